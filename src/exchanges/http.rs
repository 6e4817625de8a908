//! Shared HTTP client with a bounded retry policy.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use super::{truncate_body, ExchangeError};
use crate::config::HttpConfig;
use crate::models::ExchangeId;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    /// Map a non-success status to the matching [`ExchangeError`].
    pub fn error_for_status(&self) -> Result<(), ExchangeError> {
        if self.status.is_success() {
            return Ok(());
        }
        let status = self.status.as_u16();
        let body = truncate_body(&self.body);
        if matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            Err(ExchangeError::Auth { status, body })
        } else {
            Err(ExchangeError::Http { status, body })
        }
    }

    /// Parse the body without looking at the status.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ExchangeError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ExchangeError::malformed(format!("{e}: {}", truncate_body(&self.body))))
    }

    /// Check the status, then parse the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ExchangeError> {
        self.error_for_status()?;
        self.parse()
    }

    /// Decode a body wrapped in an exchange status envelope.
    ///
    /// Auth statuses fail first. Otherwise the envelope's own status code is
    /// checked before the HTTP status so the upstream message survives.
    pub fn envelope<T, F>(&self, check: F) -> Result<T, ExchangeError>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), ExchangeError>,
    {
        if matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            self.error_for_status()?;
        }
        match self.parse::<T>() {
            Ok(body) => {
                check(&body)?;
                self.error_for_status()?;
                Ok(body)
            }
            Err(err) => {
                self.error_for_status()?;
                Err(err)
            }
        }
    }
}

/// HTTP client shared by all adapters in a run.
///
/// Every request carries the configured timeout. Transport errors and 5xx
/// responses are retried up to `max_retries` times; 4xx responses are
/// returned immediately since a rejected signature will not succeed on retry.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("cexbook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    /// Client with default settings and no retries.
    pub fn without_retries() -> anyhow::Result<Self> {
        Self::new(&HttpConfig {
            max_retries: 0,
            ..HttpConfig::default()
        })
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// `build` runs once per attempt so signed requests get a fresh
    /// timestamp on every try.
    pub async fn send<F>(&self, exchange: ExchangeId, build: F) -> Result<HttpResponse, ExchangeError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = self.send_once(&build).await;
            let retryable = match &result {
                Ok(response) => response.status.is_server_error(),
                Err(err) => err.is_retryable(),
            };
            if !retryable || attempt >= self.max_retries {
                return result;
            }

            attempt += 1;
            match &result {
                Ok(response) => tracing::debug!(
                    exchange = %exchange,
                    status = response.status.as_u16(),
                    attempt,
                    "Retrying after server error"
                ),
                Err(err) => tracing::debug!(
                    exchange = %exchange,
                    error = %err,
                    attempt,
                    "Retrying after transport error"
                ),
            }
            tokio::time::sleep(self.retry_backoff * attempt).await;
        }
    }

    async fn send_once<F>(&self, build: &F) -> Result<HttpResponse, ExchangeError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = build(&self.client)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.without_url()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(e.without_url()))?;
        Ok(HttpResponse { status, body })
    }
}
