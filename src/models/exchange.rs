use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a supported exchange.
///
/// Serialized as the lowercase identifier used in the aggregate output
/// (`"binance"`, `"bybit"`, ...). Ordering follows declaration order, which
/// is also the order exchanges are listed in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Okx,
    Kucoin,
    Kraken,
    Zoomex,
    Htx,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 7] = [
        ExchangeId::Binance,
        ExchangeId::Bybit,
        ExchangeId::Okx,
        ExchangeId::Kucoin,
        ExchangeId::Kraken,
        ExchangeId::Zoomex,
        ExchangeId::Htx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
            ExchangeId::Kucoin => "kucoin",
            ExchangeId::Kraken => "kraken",
            ExchangeId::Zoomex => "zoomex",
            ExchangeId::Htx => "htx",
        }
    }

    /// Human-readable name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "Binance",
            ExchangeId::Bybit => "Bybit",
            ExchangeId::Okx => "OKX",
            ExchangeId::Kucoin => "KuCoin",
            ExchangeId::Kraken => "Kraken",
            ExchangeId::Zoomex => "Zoomex",
            ExchangeId::Htx => "HTX",
        }
    }

    /// Prefix of the environment-style credential keys (`BINANCE_API_KEY`, ...).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "BINANCE",
            ExchangeId::Bybit => "BYBIT",
            ExchangeId::Okx => "OKX",
            ExchangeId::Kucoin => "KUCOIN",
            ExchangeId::Kraken => "KRAKEN",
            ExchangeId::Zoomex => "ZOOMEX",
            ExchangeId::Htx => "HTX",
        }
    }

    /// Whether the exchange requires an API passphrase in addition to key and secret.
    pub fn requires_passphrase(&self) -> bool {
        matches!(self, ExchangeId::Okx | ExchangeId::Kucoin)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ExchangeId::ALL
            .into_iter()
            .find(|id| id.as_str() == lower)
            .ok_or_else(|| anyhow::anyhow!("Unknown exchange: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&ExchangeId::Okx).unwrap();
        assert_eq!(json, r#""okx""#);
        let id: ExchangeId = serde_json::from_str(r#""kucoin""#).unwrap();
        assert_eq!(id, ExchangeId::Kucoin);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Zoomex".parse::<ExchangeId>().unwrap(), ExchangeId::Zoomex);
        assert!("coinbase".parse::<ExchangeId>().is_err());
    }

    #[test]
    fn only_okx_and_kucoin_need_passphrase() {
        let with_passphrase: Vec<_> = ExchangeId::ALL
            .into_iter()
            .filter(ExchangeId::requires_passphrase)
            .collect();
        assert_eq!(with_passphrase, vec![ExchangeId::Okx, ExchangeId::Kucoin]);
    }
}
