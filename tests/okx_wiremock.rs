mod support;

use std::time::{Duration, Instant};

use anyhow::Result;
use cexbook::exchanges::{ExchangeAdapter, ExchangeError, OkxAdapter};
use cexbook::models::ExchangeId;
use support::{amount_of, context, credentials, dec, json, json_status};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer};

fn adapter(server: &MockServer) -> Result<OkxAdapter> {
    Ok(OkxAdapter::new(credentials(ExchangeId::Okx), context()?).with_base_url(server.uri()))
}

#[tokio::test]
async fn trading_account_and_sub_accounts() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/balance"))
        .and(header("OK-ACCESS-KEY", "test-key"))
        .and(header("OK-ACCESS-TIMESTAMP", "2023-11-14T22:13:20.000Z"))
        .and(header("OK-ACCESS-SIGN", "nL0Rh7FxukzVHJnSqNEksLaq26Lwl5UDLeMjLtg2/pU="))
        .and(header("OK-ACCESS-PASSPHRASE", "test-passphrase"))
        .respond_with(json(
            r#"{"code": "0", "msg": "", "data": [{"totalEq": "62000", "details": [
                {"ccy": "BTC", "cashBal": "1", "eqUsd": "61000.25"},
                {"ccy": "USDT", "cashBal": "1000", "eqUsd": "0"},
                {"ccy": "DOGE", "cashBal": "0", "eqUsd": ""}
            ]}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/users/subaccount/list"))
        .respond_with(json(
            r#"{"code": "0", "msg": "", "data": [{"subAcct": "arb-desk"}, {"subAcct": "broken"}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/subaccount/balances"))
        .and(query_param("subAcct", "arb-desk"))
        .respond_with(json(
            r#"{"code": "0", "msg": "", "data": [{"details": [
                {"ccy": "ETH", "cashBal": "3", "eqUsd": "10500"}
            ]}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/subaccount/balances"))
        .and(query_param("subAcct", "broken"))
        .respond_with(json(r#"{"code": "51000", "msg": "Parameter subAcct error", "data": []}"#))
        .mount(&server)
        .await;

    let balances = adapter(&server)?.fetch_balances().await?;

    let btc = balances.master.iter().find(|r| r.currency == "BTC").unwrap();
    assert_eq!(btc.usd_value, Some(dec("61000.25")));
    // A zero eqUsd is not trusted; the price table values it later.
    let usdt = balances.master.iter().find(|r| r.currency == "USDT").unwrap();
    assert_eq!(usdt.usd_value, None);
    assert_eq!(amount_of(&balances.master, "DOGE"), None);

    assert_eq!(balances.sub_accounts.len(), 1);
    assert_eq!(amount_of(&balances.sub_accounts["arb-desk"], "ETH"), Some(dec("3")));
    Ok(())
}

#[tokio::test]
async fn non_zero_code_fails_the_exchange() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/balance"))
        .respond_with(json(r#"{"code": "50113", "msg": "Invalid Sign", "data": []}"#))
        .mount(&server)
        .await;

    let err = adapter(&server)?.fetch_balances().await.unwrap_err();
    assert_eq!(err.to_string(), "API error 50113: Invalid Sign");
    Ok(())
}

#[tokio::test]
async fn unauthorized_is_an_auth_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/balance"))
        .respond_with(json_status(
            401,
            r#"{"code": "50111", "msg": "Invalid OK-ACCESS-KEY", "data": []}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = adapter(&server)?.fetch_balances().await.unwrap_err();
    assert!(matches!(err, ExchangeError::Auth { status: 401, .. }));
    Ok(())
}

#[tokio::test]
async fn sub_accounts_are_fetched_within_the_concurrency_limit() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/balance"))
        .respond_with(json(r#"{"code": "0", "msg": "", "data": []}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/users/subaccount/list"))
        .respond_with(json(
            r#"{"code": "0", "msg": "", "data": [
                {"subAcct": "a"}, {"subAcct": "b"}, {"subAcct": "c"}, {"subAcct": "d"}
            ]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/account/subaccount/balances"))
        .respond_with(
            json(
                r#"{"code": "0", "msg": "", "data": [{"details": [
                    {"ccy": "USDT", "cashBal": "10", "eqUsd": "10"}
                ]}]}"#,
            )
            .set_delay(Duration::from_millis(150)),
        )
        .expect(4)
        .mount(&server)
        .await;

    let started = Instant::now();
    let balances = OkxAdapter::new(
        credentials(ExchangeId::Okx),
        context()?.with_sub_account_concurrency(1),
    )
    .with_base_url(server.uri())
    .fetch_balances()
    .await?;

    // One at a time: four delayed responses back to back.
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(balances.sub_accounts.len(), 4);
    Ok(())
}
