#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use cexbook::clock::FixedClock;
use cexbook::config::ResolvedConfig;
use cexbook::credentials::ExchangeCredentials;
use cexbook::exchanges::{AdapterContext, ExchangeAdapter, ExchangeError, HttpClient};
use cexbook::models::{BalanceRecord, ExchangeBalances, ExchangeId};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use wiremock::ResponseTemplate;

/// 2023-11-14T22:13:20Z, the instant every reference signature is computed at.
pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.timestamp_millis_opt(NOW_MS).single().expect("valid timestamp"),
    ))
}

/// Adapter context with a fixed clock and no retries.
pub fn context() -> Result<AdapterContext> {
    Ok(AdapterContext::new(HttpClient::without_retries()?).with_clock(clock()))
}

pub fn credentials(exchange: ExchangeId) -> ExchangeCredentials {
    let credentials = ExchangeCredentials::new(exchange, "test-key", "test-secret");
    if exchange.requires_passphrase() {
        credentials.with_passphrase("test-passphrase")
    } else {
        credentials
    }
}

pub fn json(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json")
}

pub fn json_status(status: u16, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body.as_bytes().to_vec(), "application/json")
}

pub fn dec(raw: &str) -> Decimal {
    raw.parse().expect("valid decimal")
}

/// Find a record's amount by currency.
pub fn amount_of(records: &[BalanceRecord], currency: &str) -> Option<Decimal> {
    records
        .iter()
        .find(|r| r.currency == currency)
        .map(|r| r.amount)
}

/// Config rooted in `dir` with no retries and the given endpoint overrides.
pub fn config_in(dir: &Path, endpoints: &[(ExchangeId, String)]) -> Result<ResolvedConfig> {
    let mut config = ResolvedConfig::load_or_default(&dir.join("cexbook.toml"))?;
    config.http.max_retries = 0;
    config.endpoints = endpoints.iter().cloned().collect();
    Ok(config)
}

enum Outcome {
    Balances(ExchangeBalances),
    Api { code: String, message: String },
    Http(u16),
}

/// Adapter that returns a canned result without touching the network.
pub struct StubAdapter {
    exchange: ExchangeId,
    outcome: Outcome,
}

impl StubAdapter {
    /// Master account holding `usd` worth of USDT.
    pub fn usdt(exchange: ExchangeId, usd: i64) -> Self {
        let master = if usd == 0 {
            Vec::new()
        } else {
            vec![BalanceRecord::new("USDT", Decimal::from(usd))]
        };
        Self::balances(ExchangeBalances::new(exchange).with_master(master))
    }

    pub fn balances(balances: ExchangeBalances) -> Self {
        Self {
            exchange: balances.exchange,
            outcome: Outcome::Balances(balances),
        }
    }

    pub fn api_error(exchange: ExchangeId, code: &str, message: &str) -> Self {
        Self {
            exchange,
            outcome: Outcome::Api {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    pub fn http_error(exchange: ExchangeId, status: u16) -> Self {
        Self {
            exchange,
            outcome: Outcome::Http(status),
        }
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for StubAdapter {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        match &self.outcome {
            Outcome::Balances(balances) => Ok(balances.clone()),
            Outcome::Api { code, message } => Err(ExchangeError::Api {
                code: code.clone(),
                message: message.clone(),
            }),
            Outcome::Http(status) => Err(ExchangeError::Http {
                status: *status,
                body: "unavailable".to_string(),
            }),
        }
    }
}
