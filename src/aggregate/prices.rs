//! USD prices used to value balances that exchanges report without one.

use std::collections::HashMap;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::normalize::currency_family;
use crate::exchanges::HttpClient;
use crate::models::{parse_amount, ExchangeId};

const BINANCE_API_BASE: &str = "https://api.binance.com";

/// Quote currency of the tickers kept from Binance.
const QUOTE: &str = "USDT";

/// Currencies valued at exactly one dollar.
pub const STABLECOINS: [&str; 9] = [
    "USD", "USDT", "USDC", "BUSD", "DAI", "TUSD", "FDUSD", "USD1", "USDE",
];

/// Alternate tickers some exchanges use for the same asset.
fn canonical_symbol(symbol: &str) -> &str {
    match symbol {
        "XBT" => "BTC",
        "XDG" => "DOGE",
        other => other,
    }
}

/// Map of base currency to USD price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    prices: HashMap<String, Decimal>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (symbol, price) in pairs {
            table.insert(symbol, price);
        }
        table
    }

    /// Rough prices used when no live source is reachable.
    pub fn fallback() -> Self {
        Self::from_pairs([
            ("BTC", Decimal::from(100_000)),
            ("ETH", Decimal::from(3_500)),
            ("BNB", Decimal::from(700)),
        ])
    }

    pub fn insert(&mut self, symbol: impl Into<String>, price: Decimal) {
        self.prices.insert(symbol.into().to_ascii_uppercase(), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// USD price of one unit of `currency`.
    ///
    /// Suffixed codes are priced as their family (`ETH_EARN` as `ETH`).
    pub fn price(&self, currency: &str) -> Option<Decimal> {
        let upper = currency.to_ascii_uppercase();
        let symbol = canonical_symbol(currency_family(&upper));
        if STABLECOINS.contains(&symbol) {
            return Some(Decimal::ONE);
        }
        self.prices.get(symbol).copied()
    }

    /// USD value of `amount` units. Unknown currencies are worth zero.
    ///
    /// `None` when the product does not fit in a `Decimal`.
    pub fn usd_value(&self, currency: &str, amount: Decimal) -> Option<Decimal> {
        match self.price(currency) {
            Some(price) => amount.checked_mul(price),
            None => {
                tracing::trace!(currency, "No price; valued at zero");
                Some(Decimal::ZERO)
            }
        }
    }
}

/// Supplies the price table for an aggregation run.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self) -> Result<PriceTable>;

    fn name(&self) -> &str;
}

/// A fixed table, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    table: PriceTable,
}

impl StaticPriceSource {
    pub fn new(table: PriceTable) -> Self {
        Self { table }
    }
}

#[async_trait::async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_prices(&self) -> Result<PriceTable> {
        Ok(self.table.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Debug, Deserialize)]
struct Ticker {
    symbol: String,
    price: String,
}

/// Latest prices from Binance's public ticker endpoint.
pub struct BinancePriceSource {
    http: HttpClient,
    base_url: String,
}

impl BinancePriceSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: BINANCE_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait::async_trait]
impl PriceSource for BinancePriceSource {
    async fn fetch_prices(&self) -> Result<PriceTable> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let tickers: Vec<Ticker> = self
            .http
            .send(ExchangeId::Binance, |client| client.get(&url))
            .await
            .and_then(|response| response.json())
            .context("Failed to fetch Binance ticker prices")?;

        let mut table = PriceTable::new();
        for ticker in tickers {
            let Some(base) = ticker.symbol.strip_suffix(QUOTE) else {
                continue;
            };
            if base.is_empty() {
                continue;
            }
            if let Some(price) = parse_amount(&ticker.price).filter(|p| *p > Decimal::ZERO) {
                table.insert(base, price);
            }
        }
        tracing::debug!(count = table.len(), "Loaded ticker prices");
        Ok(table)
    }

    fn name(&self) -> &str {
        "binance"
    }
}

/// Fetch prices, falling back to [`PriceTable::fallback`] on failure.
pub async fn load_prices(source: &dyn PriceSource) -> PriceTable {
    match source.fetch_prices().await {
        Ok(table) => table,
        Err(err) => {
            tracing::warn!(source = source.name(), error = %format!("{err:#}"), "Price fetch failed; using fallback prices");
            PriceTable::fallback()
        }
    }
}
