//! Exchange adapters.
//!
//! Each adapter turns one exchange's signed account API into an
//! [`ExchangeBalances`] value. Adapters never panic on bad responses; every
//! failure comes back as an [`ExchangeError`].

mod binance;
mod bybit;
mod de;
mod factory;
mod htx;
mod http;
mod kraken;
mod kucoin;
mod okx;
pub mod signing;

pub use binance::BinanceAdapter;
pub use bybit::{BybitAdapter, BybitVenue};
pub use factory::{build_adapters, AdapterContext, DEFAULT_SUB_ACCOUNT_CONCURRENCY};
pub use htx::HtxAdapter;
pub use http::{HttpClient, HttpResponse};
pub use kraken::{strip_kraken_prefix, KrakenAdapter};
pub use kucoin::KucoinAdapter;
pub use okx::OkxAdapter;

use std::fmt;
use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::models::{ExchangeBalances, ExchangeId};

/// Longest upstream body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Why an exchange could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Network unreachable, timeout, TLS failure.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The exchange rejected the key or signature (HTTP 401/403).
    #[error("authentication rejected (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    /// The configured credentials cannot be used to sign requests.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The configured base URL cannot be used to address the exchange.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Well-formed response carrying a non-success status code.
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    /// Response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Malformed(String),

    /// A reported amount cannot be valued or summed within `Decimal` range.
    #[error("value out of range: {0}")]
    Overflow(String),
}

impl ExchangeError {
    pub(crate) fn api(code: impl fmt::Display, message: impl Into<String>) -> Self {
        ExchangeError::Api {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        ExchangeError::Malformed(what.into())
    }

    /// Whether repeating the request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Transport(_) => true,
            ExchangeError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Build a query string from key/value pairs, URL-encoding each value.
///
/// The result is signed as-is, so it must be exactly what goes on the wire.
pub(crate) fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// A failed exchange in an aggregation run.
#[derive(Debug)]
pub struct ExchangeFailure {
    pub exchange: ExchangeId,
    pub error: ExchangeError,
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.exchange.display_name(), self.error)
    }
}

impl std::error::Error for ExchangeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Reads the balances held under one set of exchange credentials.
#[async_trait::async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Fetch master and sub-account balances.
    ///
    /// Only the exchange's primary balance call is required to succeed;
    /// supplementary sources (earn products, futures wallets, sub-accounts)
    /// are skipped with a warning when they fail.
    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError>;
}

/// Run a supplementary balance source, logging and discarding its failure.
pub(crate) async fn best_effort<T, F>(exchange: ExchangeId, source: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(exchange = %exchange, source, error = %err, "Balance source skipped");
            None
        }
    }
}

/// Run `fetch` over `items` with at most `limit` futures in flight.
///
/// Items whose fetch yields `None` are dropped. Completion order is not
/// preserved.
pub(crate) async fn fan_out<I, T, F, Fut>(items: I, limit: usize, fetch: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    stream::iter(items)
        .map(fetch)
        .buffer_unordered(limit.max(1))
        .filter_map(futures::future::ready)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_names_the_exchange() {
        let failure = ExchangeFailure {
            exchange: ExchangeId::Bybit,
            error: ExchangeError::api(10003, "API key is invalid."),
        };
        assert_eq!(
            failure.to_string(),
            "Bybit API error 10003: API key is invalid."
        );
    }

    #[test]
    fn only_transport_and_server_errors_are_retryable() {
        assert!(ExchangeError::Http { status: 502, body: String::new() }.is_retryable());
        assert!(!ExchangeError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!ExchangeError::Auth { status: 401, body: String::new() }.is_retryable());
        assert!(!ExchangeError::api("50113", "Invalid Sign").is_retryable());
    }

    #[test]
    fn query_values_are_encoded() {
        let query = encode_query(&[
            ("email", "desk+1@fund.io".to_string()),
            ("limit", "200".to_string()),
        ]);
        assert_eq!(query, "email=desk%2B1%40fund.io&limit=200");
    }

    #[tokio::test]
    async fn fan_out_never_exceeds_its_limit() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let counters = (AtomicUsize::new(0), AtomicUsize::new(0));
        let (in_flight, peak) = (&counters.0, &counters.1);
        let mut values = fan_out(0..10, 3, move |n| async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            (n % 2 == 0).then_some(n)
        })
        .await;

        values.sort_unstable();
        assert_eq!(values, vec![0, 2, 4, 6, 8]);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        let truncated = truncate_body(&body);
        assert!(truncated.len() < 600);
        assert!(truncated.ends_with("..."));
    }
}
