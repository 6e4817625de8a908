mod support;

use std::time::Duration;

use anyhow::Result;
use cexbook::config::HttpConfig;
use cexbook::credentials::ExchangeCredentials;
use cexbook::exchanges::{
    AdapterContext, ExchangeAdapter, ExchangeError, HttpClient, KrakenAdapter,
};
use cexbook::models::ExchangeId;
use reqwest::StatusCode;
use support::{clock, json, json_status};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn retrying_client() -> Result<HttpClient> {
    HttpClient::new(&HttpConfig {
        timeout: Duration::from_secs(5),
        max_retries: 1,
        retry_backoff: Duration::from_millis(1),
        ..HttpConfig::default()
    })
}

#[tokio::test]
async fn server_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(json(r#"{"ok": true}"#))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/ping", server.uri());
    let response = retrying_client()?
        .send(ExchangeId::Binance, |client| client.get(&url))
        .await?;
    assert_eq!(response.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn retries_stop_at_the_configured_limit() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(2)
        .mount(&server)
        .await;

    let url = format!("{}/ping", server.uri());
    let response = retrying_client()?
        .send(ExchangeId::Binance, |client| client.get(&url))
        .await?;
    let err = response.error_for_status().unwrap_err();
    assert!(matches!(err, ExchangeError::Http { status: 502, .. }));
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/0/private/Balance"))
        .respond_with(json_status(401, r#"{"error": ["EAPI:Invalid key"]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let credentials =
        ExchangeCredentials::new(ExchangeId::Kraken, "test-key", "a3Jha2VuLXNlY3JldC1ieXRlcw==");
    let context = AdapterContext::new(retrying_client()?).with_clock(clock());
    let err = KrakenAdapter::new(credentials, context)
        .with_base_url(server.uri())
        .fetch_balances()
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Auth { status: 401, .. }));
    Ok(())
}
