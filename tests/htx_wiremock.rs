mod support;

use anyhow::Result;
use cexbook::exchanges::{ExchangeAdapter, ExchangeError, HtxAdapter};
use cexbook::models::ExchangeId;
use support::{amount_of, context, credentials, dec, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer};

fn adapter(server: &MockServer) -> Result<HtxAdapter> {
    Ok(HtxAdapter::new(credentials(ExchangeId::Htx), context()?).with_base_url(server.uri()))
}

#[tokio::test]
async fn spot_and_secondary_accounts_are_combined() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/account/accounts"))
        .and(query_param("AccessKeyId", "test-key"))
        .and(query_param("SignatureMethod", "HmacSHA256"))
        .and(query_param("SignatureVersion", "2"))
        .and(query_param("Timestamp", "2023-11-14T22:13:20"))
        .respond_with(json(
            r#"{"status": "ok", "data": [
                {"id": 100, "type": "spot", "subtype": "", "state": "working"},
                {"id": 200, "type": "super-margin", "subtype": "", "state": "working"},
                {"id": 300, "type": "point", "subtype": "", "state": "working"}
            ]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/account/accounts/100/balance"))
        .respond_with(json(
            r#"{"status": "ok", "data": {"id": 100, "type": "spot", "list": [
                {"currency": "usdt", "type": "trade", "balance": "300.5"},
                {"currency": "usdt", "type": "frozen", "balance": "20"},
                {"currency": "btc", "type": "trade", "balance": "0"}
            ]}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/account/accounts/200/balance"))
        .respond_with(json(
            r#"{"status": "ok", "data": {"list": [
                {"currency": "eth", "type": "trade", "balance": "1.5"}
            ]}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/account/accounts/300/balance"))
        .respond_with(json(
            r#"{"status": "error", "err-code": "account-frozen", "err-msg": "account frozen"}"#,
        ))
        .mount(&server)
        .await;

    let balances = adapter(&server)?.fetch_balances().await?;

    assert_eq!(amount_of(&balances.master, "USDT"), Some(dec("320.5")));
    assert_eq!(amount_of(&balances.master, "ETH_SUPER_MARGIN"), Some(dec("1.5")));
    assert_eq!(amount_of(&balances.master, "BTC"), None);
    assert_eq!(balances.master.len(), 2);
    Ok(())
}

#[tokio::test]
async fn failing_spot_balance_fails_the_exchange() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/account/accounts"))
        .respond_with(json(r#"{"status": "ok", "data": [{"id": 100, "type": "spot"}]}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/account/accounts/100/balance"))
        .respond_with(json(
            r#"{"status": "error", "err-code": "api-signature-not-valid", "err-msg": "Signature not valid"}"#,
        ))
        .mount(&server)
        .await;

    let err = adapter(&server)?.fetch_balances().await.unwrap_err();
    assert!(
        matches!(&err, ExchangeError::Api { code, .. } if code == "api-signature-not-valid"),
        "{err}"
    );
    Ok(())
}
