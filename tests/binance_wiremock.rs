mod support;

use anyhow::Result;
use cexbook::aggregate::aggregate_balances_with_clock;
use cexbook::credentials::MemoryCredentialStore;
use cexbook::exchanges::{BinanceAdapter, ExchangeAdapter, ExchangeError};
use cexbook::models::ExchangeId;
use rust_decimal::Decimal;
use support::{amount_of, clock, config_in, context, credentials, dec, json, json_status};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer};

const SPOT: &str = r#"{
    "makerCommission": 10,
    "balances": [
        {"asset": "BTC", "free": "0.50000000", "locked": "0.10000000"},
        {"asset": "USDT", "free": "100.00000000", "locked": "0.00000000"},
        {"asset": "DUST", "free": "0.00000000", "locked": "0.00000000"}
    ]
}"#;

fn adapter(server: &MockServer) -> Result<BinanceAdapter> {
    Ok(BinanceAdapter::new(credentials(ExchangeId::Binance), context()?).with_base_url(server.uri()))
}

async fn mount_spot(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(header("X-MBX-APIKEY", "test-key"))
        .and(query_param("timestamp", "1700000000000"))
        .and(query_param(
            "signature",
            "dccf2651b1d8329665bfddb0798eccd4650d986a9cfe5547b2f5822131e7620b",
        ))
        .respond_with(json(SPOT))
        .mount(server)
        .await;
}

#[tokio::test]
async fn master_collects_spot_earn_and_futures() -> Result<()> {
    let server = MockServer::start().await;
    mount_spot(&server).await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/simple-earn/flexible/position"))
        .and(query_param("size", "100"))
        .respond_with(json(
            r#"{"rows": [{"asset": "USDT", "totalAmount": "50.5"}], "total": 1}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/simple-earn/locked/position"))
        .respond_with(json(r#"{"rows": [{"asset": "ETH", "amount": "2"}], "total": 1}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fapi/v2/account"))
        .respond_with(json(
            r#"{"assets": [
                {"asset": "USDT", "marginBalance": "25.00000000", "unrealizedProfit": "-5.00000000"},
                {"asset": "BNB", "marginBalance": "0.00000000", "unrealizedProfit": "0.00000000"}
            ]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/sub-account/list"))
        .respond_with(json(r#"{"subAccounts": []}"#))
        .mount(&server)
        .await;

    let balances = adapter(&server)?.fetch_balances().await?;

    assert_eq!(balances.exchange, ExchangeId::Binance);
    assert_eq!(amount_of(&balances.master, "BTC"), Some(dec("0.6")));
    assert_eq!(amount_of(&balances.master, "USDT"), Some(dec("100")));
    assert_eq!(amount_of(&balances.master, "USDT_EARN"), Some(dec("50.5")));
    assert_eq!(amount_of(&balances.master, "ETH_EARN_LOCKED"), Some(dec("2")));
    assert_eq!(amount_of(&balances.master, "USDT_FUTURES"), Some(dec("25")));
    assert_eq!(amount_of(&balances.master, "DUST"), None);
    assert_eq!(amount_of(&balances.master, "BNB_FUTURES"), None);
    assert_eq!(balances.unrealized_pnl.len(), 1);
    assert_eq!(balances.unrealized_pnl["USDT_FUTURES"], dec("-5"));
    assert!(balances.sub_accounts.is_empty());
    Ok(())
}

#[tokio::test]
async fn sub_accounts_merge_spot_futures_and_margin() -> Result<()> {
    let server = MockServer::start().await;
    mount_spot(&server).await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/sub-account/list"))
        .and(query_param("limit", "200"))
        .respond_with(json(
            r#"{"subAccounts": [{"email": "desk@fund.io"}, {"email": "idle@fund.io"}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v4/sub-account/assets"))
        .and(query_param("email", "desk@fund.io"))
        .respond_with(json(
            r#"{"balances": [{"asset": "ETH", "free": "1", "locked": "0"}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v4/sub-account/assets"))
        .and(query_param("email", "idle@fund.io"))
        .respond_with(json(r#"{"balances": []}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v2/sub-account/futures/account"))
        .and(query_param("email", "desk@fund.io"))
        .and(query_param("futuresType", "1"))
        .respond_with(json(
            r#"{"futureAccountResp": {"assets": [{"asset": "USDT", "marginBalance": "10"}]}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/sub-account/margin/account"))
        .and(query_param("email", "desk@fund.io"))
        .respond_with(json(
            r#"{"marginUserAssetVoList": [{"asset": "BTC", "netAsset": "0.1"}]}"#,
        ))
        .mount(&server)
        .await;

    let balances = adapter(&server)?.fetch_balances().await?;

    // The idle sub-account holds nothing and is left out.
    assert_eq!(balances.sub_accounts.len(), 1);
    let desk = &balances.sub_accounts["desk@fund.io"];
    assert_eq!(amount_of(desk, "ETH"), Some(dec("1")));
    assert_eq!(amount_of(desk, "USDT_FUTURES"), Some(dec("10")));
    assert_eq!(amount_of(desk, "BTC_MARGIN"), Some(dec("0.1")));
    // Coin-margined futures were not mocked and are skipped.
    assert_eq!(amount_of(desk, "BTC_COIN_FUTURES"), None);
    Ok(())
}

#[tokio::test]
async fn sub_account_keeps_futures_when_its_spot_wallet_fails() -> Result<()> {
    let server = MockServer::start().await;
    mount_spot(&server).await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/sub-account/list"))
        .respond_with(json(r#"{"subAccounts": [{"email": "desk@fund.io"}]}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v4/sub-account/assets"))
        .respond_with(json_status(400, r#"{"code": -12022, "msg": "Sub-account not enabled."}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v2/sub-account/futures/account"))
        .and(query_param("futuresType", "1"))
        .respond_with(json(
            r#"{"futureAccountResp": {"assets": [
                {"asset": "USDT", "marginBalance": "310", "unrealizedProfit": "10"}
            ]}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sapi/v1/sub-account/margin/account"))
        .respond_with(json(
            r#"{"marginUserAssetVoList": [{"asset": "ETH", "netAsset": "0.5"}]}"#,
        ))
        .mount(&server)
        .await;

    let balances = adapter(&server)?.fetch_balances().await?;

    let desk = &balances.sub_accounts["desk@fund.io"];
    assert_eq!(desk.len(), 2);
    assert_eq!(amount_of(desk, "USDT_FUTURES"), Some(dec("310")));
    assert_eq!(amount_of(desk, "ETH_MARGIN"), Some(dec("0.5")));
    assert_eq!(balances.unrealized_pnl["USDT_FUTURES"], dec("10"));
    Ok(())
}

#[tokio::test]
async fn rejected_signature_is_an_api_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(json_status(
            400,
            r#"{"code": -1022, "msg": "Signature for this request is not valid."}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = adapter(&server)?.fetch_balances().await.unwrap_err();
    match err {
        ExchangeError::Api { code, message } => {
            assert_eq!(code, "-1022");
            assert_eq!(message, "Signature for this request is not valid.");
        }
        other => panic!("expected API error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn only_binance_configured_yields_single_exchange_snapshot() -> Result<()> {
    let server = MockServer::start().await;
    mount_spot(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(json(
            r#"[{"symbol": "BTCUSDT", "price": "60000.00"}, {"symbol": "ETHBTC", "price": "0.05"}]"#,
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new()?;
    let config = config_in(dir.path(), &[(ExchangeId::Binance, server.uri())])?;
    let store = MemoryCredentialStore::from_pairs([
        ("BINANCE_API_KEY", "test-key"),
        ("BINANCE_API_SECRET", "test-secret"),
    ]);

    let snapshot = aggregate_balances_with_clock(&store, &config, clock()).await?;

    assert_eq!(snapshot.balances.len(), 1);
    assert!(snapshot.errors.is_empty());
    let binance = &snapshot.balances[&ExchangeId::Binance];
    assert_eq!(binance.master_breakdown["BTC"].usd, Decimal::from(36_000));
    assert_eq!(binance.master_breakdown["USDT"].usd, Decimal::from(100));
    assert_eq!(binance.master_usd, Decimal::from(36_100));
    assert_eq!(binance.subaccounts_total_usd, Decimal::ZERO);
    assert_eq!(snapshot.grand_total_usd, binance.exchange_total_usd);

    let json = serde_json::to_value(&snapshot)?;
    assert!(json.get("errors").is_none());
    Ok(())
}
