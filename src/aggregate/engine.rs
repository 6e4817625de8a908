//! Concurrent fan-out over exchange adapters.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use rust_decimal::Decimal;

use super::prices::{load_prices, BinancePriceSource, PriceSource};
use super::rollup::build_snapshot;
use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::credentials::{resolve_credentials, CredentialStore};
use crate::exchanges::{build_adapters, AdapterContext, ExchangeAdapter, ExchangeFailure, HttpClient};
use crate::models::{AggregateSnapshot, ExchangeBalances, ExchangeId};

/// Runs every adapter once and folds the outcomes into a snapshot.
pub struct AggregationEngine {
    adapters: Vec<Box<dyn ExchangeAdapter>>,
    prices: Box<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    min_subaccount_usd: Decimal,
}

impl AggregationEngine {
    pub fn new(adapters: Vec<Box<dyn ExchangeAdapter>>, prices: Box<dyn PriceSource>) -> Self {
        Self {
            adapters,
            prices,
            clock: Arc::new(SystemClock),
            min_subaccount_usd: Decimal::ONE,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_min_subaccount_usd(mut self, min_subaccount_usd: Decimal) -> Self {
        self.min_subaccount_usd = min_subaccount_usd;
        self
    }

    pub fn exchanges(&self) -> Vec<ExchangeId> {
        self.adapters.iter().map(|a| a.exchange()).collect()
    }

    /// Poll every exchange concurrently.
    ///
    /// Exchange failures are recorded in the snapshot's `errors`; none of
    /// them cancels or alters another exchange's result.
    pub async fn run(&self) -> Result<AggregateSnapshot> {
        tracing::debug!(exchanges = ?self.exchanges(), "Polling exchanges");
        let polls = self.adapters.iter().map(|adapter| poll(adapter.as_ref()));
        let (results, prices) = tokio::join!(join_all(polls), load_prices(self.prices.as_ref()));

        let snapshot = build_snapshot(self.clock.now(), results, &prices, self.min_subaccount_usd);
        tracing::info!(
            exchanges = snapshot.balances.len(),
            errors = snapshot.errors.len(),
            grand_total_usd = %snapshot.grand_total_usd,
            "Aggregation complete"
        );
        Ok(snapshot)
    }
}

async fn poll(adapter: &dyn ExchangeAdapter) -> Result<ExchangeBalances, ExchangeFailure> {
    let exchange = adapter.exchange();
    match adapter.fetch_balances().await {
        Ok(balances) => {
            tracing::info!(
                exchange = %exchange,
                records = balances.scopes().map(|(_, records)| records.len()).sum::<usize>(),
                sub_accounts = balances.sub_accounts.len(),
                "Exchange polled"
            );
            Ok(balances)
        }
        Err(error) => {
            tracing::warn!(exchange = %exchange, error = %error, "Exchange failed");
            Err(ExchangeFailure { exchange, error })
        }
    }
}

/// Resolve credentials, build adapters and run one aggregation pass.
///
/// Only a credential store failure or HTTP client construction failure
/// aborts the run.
pub async fn aggregate_balances(
    store: &dyn CredentialStore,
    config: &ResolvedConfig,
) -> Result<AggregateSnapshot> {
    aggregate_balances_with_clock(store, config, Arc::new(SystemClock)).await
}

pub async fn aggregate_balances_with_clock(
    store: &dyn CredentialStore,
    config: &ResolvedConfig,
    clock: Arc<dyn Clock>,
) -> Result<AggregateSnapshot> {
    let credentials = resolve_credentials(store)
        .await
        .context("Failed to resolve exchange credentials")?;
    if credentials.is_empty() {
        tracing::warn!("No exchange has complete credentials");
    }

    let http = HttpClient::new(&config.http).context("Failed to build HTTP client")?;
    let context = AdapterContext::new(http.clone())
        .with_clock(clock.clone())
        .with_sub_account_concurrency(config.http.sub_account_concurrency);
    let adapters = build_adapters(credentials, &context, &config.endpoints);

    let mut prices = BinancePriceSource::new(http);
    if let Some(url) = config.endpoint(ExchangeId::Binance) {
        prices = prices.with_base_url(url);
    }

    AggregationEngine::new(adapters, Box::new(prices))
        .with_clock(clock)
        .with_min_subaccount_usd(config.display.min_subaccount_usd)
        .run()
        .await
}
