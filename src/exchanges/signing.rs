//! HMAC primitives shared by the exchange signing schemes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(key).unwrap_or_else(|_| unreachable!());
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// HMAC-SHA256, lowercase hex encoded (Binance, Bybit).
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    hex::encode(hmac_sha256(secret.as_bytes(), message.as_bytes()))
}

/// HMAC-SHA256, standard base64 encoded (OKX, KuCoin, HTX).
pub fn hmac_sha256_base64(secret: &str, message: &str) -> String {
    STANDARD.encode(hmac_sha256(secret.as_bytes(), message.as_bytes()))
}

/// Kraken's two-stage signature:
/// `base64(HMAC-SHA512(base64decode(secret), path + SHA256(nonce + body)))`.
pub fn kraken_signature(
    secret_b64: &str,
    path: &str,
    nonce: &str,
    body: &str,
) -> Result<String, base64::DecodeError> {
    let key = STANDARD.decode(secret_b64.trim())?;

    let mut sha = Sha256::new();
    sha.update(nonce.as_bytes());
    sha.update(body.as_bytes());
    let digest = sha.finalize();

    let mut mac = HmacSha512::new_from_slice(&key).unwrap_or_else(|_| unreachable!());
    mac.update(path.as_bytes());
    mac.update(&digest);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_matches_published_binance_example() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            hmac_sha256_hex(secret, query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn kraken_matches_published_example() {
        let secret = "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";
        let body = "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";
        let signature =
            kraken_signature(secret, "/0/private/AddOrder", "1616492376594", body).unwrap();
        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn kraken_rejects_secret_that_is_not_base64() {
        assert!(kraken_signature("not base64!", "/0/private/Balance", "1", "nonce=1").is_err());
    }
}
