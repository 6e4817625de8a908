//! Kraken private `Balance` endpoint.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::signing::kraken_signature;
use super::{AdapterContext, ExchangeAdapter, ExchangeError};
use crate::credentials::ExchangeCredentials;
use crate::models::{parse_amount, BalanceSheet, ExchangeBalances, ExchangeId};

const API_BASE: &str = "https://api.kraken.com";
const BALANCE_PATH: &str = "/0/private/Balance";
const EXCHANGE: ExchangeId = ExchangeId::Kraken;

/// Drop Kraken's single-character asset class marker.
///
/// `XXBT` becomes `XBT` and `ZUSD` becomes `USD`. Only one character is
/// ever removed, and codes without a marker are returned unchanged.
pub fn strip_kraken_prefix(code: &str) -> &str {
    code.strip_prefix('X')
        .or_else(|| code.strip_prefix('Z'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(code)
}

pub struct KrakenAdapter {
    credentials: ExchangeCredentials,
    ctx: AdapterContext,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: Option<BTreeMap<String, String>>,
}

/// Kraken errors read like `EAPI:Invalid key`.
fn api_error(errors: &[String]) -> ExchangeError {
    let joined = errors.join("; ");
    match errors.first().and_then(|e| e.split_once(':')) {
        Some((code, _)) if errors.len() == 1 => {
            ExchangeError::api(code, joined[code.len() + 1..].to_string())
        }
        Some((code, _)) => ExchangeError::api(code, joined),
        None => ExchangeError::api("error", joined),
    }
}

impl KrakenAdapter {
    pub fn new(credentials: ExchangeCredentials, ctx: AdapterContext) -> Self {
        Self {
            credentials,
            ctx,
            base_url: API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Microsecond nonce; must increase across calls with the same key.
    fn nonce(&self) -> String {
        (self.ctx.clock.now_millis() * 1000).to_string()
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for KrakenAdapter {
    fn exchange(&self) -> ExchangeId {
        EXCHANGE
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        let secret = self.credentials.api_secret.expose_secret();
        // Catch an undecodable secret before any request goes out.
        kraken_signature(secret, BALANCE_PATH, "0", "")
            .map_err(|e| ExchangeError::InvalidCredentials(format!("API secret is not base64: {e}")))?;

        let url = format!("{}{BALANCE_PATH}", self.base_url);
        let response = self
            .ctx
            .http
            .send(EXCHANGE, |client| {
                let nonce = self.nonce();
                let body = format!("nonce={nonce}");
                let signature =
                    kraken_signature(secret, BALANCE_PATH, &nonce, &body).unwrap_or_default();
                client
                    .post(&url)
                    .header("API-Key", &self.credentials.api_key)
                    .header("API-Sign", signature)
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(body)
            })
            .await?;

        let envelope: Envelope = response.envelope(|body: &Envelope| {
            if body.error.is_empty() {
                Ok(())
            } else {
                Err(api_error(&body.error))
            }
        })?;
        let result = envelope
            .result
            .ok_or_else(|| ExchangeError::malformed("missing result"))?;

        let mut sheet = BalanceSheet::new();
        for (code, raw) in result {
            let amount = parse_amount(&raw)
                .ok_or_else(|| ExchangeError::malformed(format!("invalid balance for {code}: {raw}")))?;
            if amount > Decimal::ZERO {
                sheet.add(strip_kraken_prefix(&code), amount, None);
            }
        }
        Ok(ExchangeBalances::new(EXCHANGE).with_master(sheet.into_records()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_exactly_one_marker() {
        assert_eq!(strip_kraken_prefix("XXBT"), "XBT");
        assert_eq!(strip_kraken_prefix("ZUSD"), "USD");
        assert_eq!(strip_kraken_prefix("XETH"), "ETH");
        assert_eq!(strip_kraken_prefix("DOT"), "DOT");
        assert_eq!(strip_kraken_prefix("USDT"), "USDT");
        assert_eq!(strip_kraken_prefix("X"), "X");
    }

    #[test]
    fn signature_matches_reference_vector() {
        let nonce = "1700000000000000";
        assert_eq!(
            kraken_signature(
                "a3Jha2VuLXNlY3JldC1ieXRlcw==",
                BALANCE_PATH,
                nonce,
                &format!("nonce={nonce}")
            )
            .unwrap(),
            "EMpirPLMkVO0JHD2u8fleqNiJwlLGj3gIuXL8f/K/jW7Q1+6idKh85gfmWsKyGg2vaPmphaaVOT6oDD2ZXJ+OA=="
        );
    }

    #[test]
    fn error_array_keeps_upstream_text() {
        let err = api_error(&["EAPI:Invalid key".to_string()]);
        assert_eq!(err.to_string(), "API error EAPI: Invalid key");

        let err = api_error(&["EGeneral:Too many requests".into(), "EAPI:Rate limit".into()]);
        assert_eq!(
            err.to_string(),
            "API error EGeneral: EGeneral:Too many requests; EAPI:Rate limit"
        );
    }
}
