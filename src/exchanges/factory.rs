use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    BinanceAdapter, BybitAdapter, BybitVenue, ExchangeAdapter, HtxAdapter, HttpClient,
    KrakenAdapter, KucoinAdapter, OkxAdapter,
};
use crate::clock::{Clock, SystemClock};
use crate::credentials::ExchangeCredentials;
use crate::models::ExchangeId;

/// Sub-accounts fetched at once when nothing else is configured.
pub const DEFAULT_SUB_ACCOUNT_CONCURRENCY: usize = 4;

/// Shared resources handed to every adapter in a run.
#[derive(Clone)]
pub struct AdapterContext {
    pub http: HttpClient,
    pub clock: Arc<dyn Clock>,
    /// Upper bound on sub-accounts fetched concurrently per exchange.
    pub sub_account_concurrency: usize,
}

impl AdapterContext {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            clock: Arc::new(SystemClock),
            sub_account_concurrency: DEFAULT_SUB_ACCOUNT_CONCURRENCY,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Values below one are treated as one.
    pub fn with_sub_account_concurrency(mut self, limit: usize) -> Self {
        self.sub_account_concurrency = limit.max(1);
        self
    }
}

/// Create one adapter per resolved credential bundle.
///
/// `endpoints` overrides the production base URL of an exchange.
pub fn build_adapters(
    credentials: Vec<ExchangeCredentials>,
    context: &AdapterContext,
    endpoints: &BTreeMap<ExchangeId, String>,
) -> Vec<Box<dyn ExchangeAdapter>> {
    credentials
        .into_iter()
        .map(|creds| {
            let exchange = creds.exchange;
            let endpoint = endpoints.get(&exchange).cloned();
            let ctx = context.clone();
            let adapter: Box<dyn ExchangeAdapter> = match exchange {
                ExchangeId::Binance => {
                    let adapter = BinanceAdapter::new(creds, ctx);
                    Box::new(match endpoint {
                        Some(url) => adapter.with_base_url(url),
                        None => adapter,
                    })
                }
                ExchangeId::Bybit | ExchangeId::Zoomex => {
                    let venue = if exchange == ExchangeId::Bybit {
                        BybitVenue::Bybit
                    } else {
                        BybitVenue::Zoomex
                    };
                    let adapter = BybitAdapter::new(venue, creds, ctx);
                    Box::new(match endpoint {
                        Some(url) => adapter.with_base_url(url),
                        None => adapter,
                    })
                }
                ExchangeId::Okx => {
                    let adapter = OkxAdapter::new(creds, ctx);
                    Box::new(match endpoint {
                        Some(url) => adapter.with_base_url(url),
                        None => adapter,
                    })
                }
                ExchangeId::Kucoin => {
                    let adapter = KucoinAdapter::new(creds, ctx);
                    Box::new(match endpoint {
                        Some(url) => adapter.with_base_url(url),
                        None => adapter,
                    })
                }
                ExchangeId::Kraken => {
                    let adapter = KrakenAdapter::new(creds, ctx);
                    Box::new(match endpoint {
                        Some(url) => adapter.with_base_url(url),
                        None => adapter,
                    })
                }
                ExchangeId::Htx => {
                    let adapter = HtxAdapter::new(creds, ctx);
                    Box::new(match endpoint {
                        Some(url) => adapter.with_base_url(url),
                        None => adapter,
                    })
                }
            };
            tracing::debug!(exchange = %exchange, "Adapter enabled");
            adapter
        })
        .collect()
}
