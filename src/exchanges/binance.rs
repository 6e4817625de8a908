//! Binance spot, simple-earn, futures and sub-account balances.
//!
//! Requests are signed with HMAC-SHA256 over the exact query string sent,
//! including the trailing `timestamp` parameter.

use futures::FutureExt;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::de::decimal;
use super::signing::hmac_sha256_hex;
use super::{
    best_effort, encode_query, fan_out, AdapterContext, ExchangeAdapter, ExchangeError,
    HttpResponse,
};
use crate::credentials::ExchangeCredentials;
use crate::models::{BalanceSheet, ExchangeBalances, ExchangeId};

const API_BASE: &str = "https://api.binance.com";
const FUTURES_API_BASE: &str = "https://fapi.binance.com";
const EXCHANGE: ExchangeId = ExchangeId::Binance;

/// Sign a Binance query string.
pub fn sign(secret: &str, query: &str) -> String {
    hmac_sha256_hex(secret, query)
}

pub struct BinanceAdapter {
    credentials: ExchangeCredentials,
    ctx: AdapterContext,
    base_url: String,
    futures_base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct SpotBalance {
    asset: String,
    #[serde(default, deserialize_with = "decimal")]
    free: Decimal,
    #[serde(default, deserialize_with = "decimal")]
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct SpotAccount {
    #[serde(default)]
    balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
struct Rows<T> {
    #[serde(default = "Vec::new")]
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlexiblePosition {
    asset: String,
    #[serde(default, deserialize_with = "decimal")]
    total_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct LockedPosition {
    asset: String,
    #[serde(default, deserialize_with = "decimal")]
    amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesAsset {
    asset: String,
    #[serde(default, deserialize_with = "decimal")]
    margin_balance: Decimal,
    #[serde(default, deserialize_with = "decimal")]
    unrealized_profit: Decimal,
}

#[derive(Debug, Default, Deserialize)]
struct FuturesAccount {
    #[serde(default)]
    assets: Vec<FuturesAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubAccountList {
    #[serde(default)]
    sub_accounts: Vec<SubAccount>,
}

#[derive(Debug, Deserialize)]
struct SubAccount {
    email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubFuturesAccount {
    #[serde(default)]
    future_account_resp: Option<FuturesAccount>,
    #[serde(default)]
    delivery_account_resp: Option<FuturesAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginAsset {
    asset: String,
    #[serde(default, deserialize_with = "decimal")]
    net_asset: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubMarginAccount {
    #[serde(default)]
    margin_user_asset_vo_list: Vec<MarginAsset>,
}

#[derive(Clone, Copy)]
enum FuturesKind {
    UsdMargined,
    CoinMargined,
}

impl FuturesKind {
    fn futures_type(self) -> &'static str {
        match self {
            FuturesKind::UsdMargined => "1",
            FuturesKind::CoinMargined => "2",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            FuturesKind::UsdMargined => "_FUTURES",
            FuturesKind::CoinMargined => "_COIN_FUTURES",
        }
    }
}

fn add_spot(sheet: &mut BalanceSheet, balances: Vec<SpotBalance>) {
    for balance in balances {
        let total = balance.free + balance.locked;
        if total > Decimal::ZERO {
            sheet.add(balance.asset, total, None);
        }
    }
}

/// Margin balances already include unrealized PnL, which is returned
/// separately keyed by the same currency code.
fn add_futures(
    sheet: &mut BalanceSheet,
    assets: Vec<FuturesAsset>,
    suffix: &str,
) -> Vec<(String, Decimal)> {
    let mut upnl = Vec::new();
    for asset in assets {
        if asset.margin_balance.is_zero() {
            continue;
        }
        let currency = format!("{}{suffix}", asset.asset);
        if !asset.unrealized_profit.is_zero() {
            upnl.push((currency.clone(), asset.unrealized_profit));
        }
        sheet.add(currency, asset.margin_balance, None);
    }
    upnl
}

/// One sub-account's balances and the unrealized PnL within them.
struct SubAccountSheet {
    email: String,
    sheet: BalanceSheet,
    upnl: Vec<(String, Decimal)>,
}

impl BinanceAdapter {
    pub fn new(credentials: ExchangeCredentials, ctx: AdapterContext) -> Self {
        Self {
            credentials,
            ctx,
            base_url: API_BASE.to_string(),
            futures_base_url: FUTURES_API_BASE.to_string(),
        }
    }

    /// Point both the spot and futures APIs at `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.futures_base_url = base_url.clone();
        self.base_url = base_url;
        self
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = encode_query(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", self.ctx.clock.now_millis()));
        let signature = sign(self.credentials.api_secret.expose_secret(), &query);
        format!("{query}&signature={signature}")
    }

    async fn get<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let response = self
            .ctx
            .http
            .send(EXCHANGE, |client| {
                client
                    .get(format!("{base_url}{path}?{}", self.signed_query(params)))
                    .header("X-MBX-APIKEY", &self.credentials.api_key)
            })
            .await?;
        decode(&response)
    }

    async fn spot(&self) -> Result<Vec<SpotBalance>, ExchangeError> {
        let account: SpotAccount = self.get(&self.base_url, "/api/v3/account", &[]).await?;
        Ok(account.balances)
    }

    async fn flexible_earn(&self) -> Result<Vec<FlexiblePosition>, ExchangeError> {
        let rows: Rows<FlexiblePosition> = self
            .get(
                &self.base_url,
                "/sapi/v1/simple-earn/flexible/position",
                &[("size", "100".to_string())],
            )
            .await?;
        Ok(rows.rows)
    }

    async fn locked_earn(&self) -> Result<Vec<LockedPosition>, ExchangeError> {
        let rows: Rows<LockedPosition> = self
            .get(
                &self.base_url,
                "/sapi/v1/simple-earn/locked/position",
                &[("size", "100".to_string())],
            )
            .await?;
        Ok(rows.rows)
    }

    async fn futures(&self) -> Result<Vec<FuturesAsset>, ExchangeError> {
        let account: FuturesAccount = self
            .get(&self.futures_base_url, "/fapi/v2/account", &[])
            .await?;
        Ok(account.assets)
    }

    async fn sub_account_emails(&self) -> Result<Vec<String>, ExchangeError> {
        let list: SubAccountList = self
            .get(
                &self.base_url,
                "/sapi/v1/sub-account/list",
                &[("limit", "200".to_string())],
            )
            .await?;
        Ok(list.sub_accounts.into_iter().map(|s| s.email).collect())
    }

    async fn sub_account_spot(&self, email: &str) -> Result<Vec<SpotBalance>, ExchangeError> {
        let account: SpotAccount = self
            .get(
                &self.base_url,
                "/sapi/v4/sub-account/assets",
                &[("email", email.to_string())],
            )
            .await?;
        Ok(account.balances)
    }

    async fn sub_account_futures(
        &self,
        email: &str,
        kind: FuturesKind,
    ) -> Result<Vec<FuturesAsset>, ExchangeError> {
        let account: SubFuturesAccount = self
            .get(
                &self.base_url,
                "/sapi/v2/sub-account/futures/account",
                &[
                    ("email", email.to_string()),
                    ("futuresType", kind.futures_type().to_string()),
                ],
            )
            .await?;
        let account = match kind {
            FuturesKind::UsdMargined => account.future_account_resp,
            FuturesKind::CoinMargined => account.delivery_account_resp,
        };
        Ok(account.unwrap_or_default().assets)
    }

    async fn sub_account_margin(&self, email: &str) -> Result<Vec<MarginAsset>, ExchangeError> {
        let account: SubMarginAccount = self
            .get(
                &self.base_url,
                "/sapi/v1/sub-account/margin/account",
                &[("email", email.to_string())],
            )
            .await?;
        Ok(account.margin_user_asset_vo_list)
    }

    /// Balances of one sub-account. Each section is read on its own and
    /// whatever succeeds is kept.
    async fn sub_account(&self, email: String) -> SubAccountSheet {
        let (spot, usd_futures, coin_futures, margin) = tokio::join!(
            best_effort(EXCHANGE, "sub-account spot", self.sub_account_spot(&email)),
            best_effort(
                EXCHANGE,
                "sub-account futures",
                self.sub_account_futures(&email, FuturesKind::UsdMargined)
            ),
            best_effort(
                EXCHANGE,
                "sub-account coin futures",
                self.sub_account_futures(&email, FuturesKind::CoinMargined)
            ),
            best_effort(EXCHANGE, "sub-account margin", self.sub_account_margin(&email)),
        );

        let mut sheet = BalanceSheet::new();
        add_spot(&mut sheet, spot.unwrap_or_default());
        let mut upnl = add_futures(
            &mut sheet,
            usd_futures.unwrap_or_default(),
            FuturesKind::UsdMargined.suffix(),
        );
        upnl.extend(add_futures(
            &mut sheet,
            coin_futures.unwrap_or_default(),
            FuturesKind::CoinMargined.suffix(),
        ));
        for asset in margin.unwrap_or_default() {
            if !asset.net_asset.is_zero() {
                sheet.add(format!("{}_MARGIN", asset.asset), asset.net_asset, None);
            }
        }
        SubAccountSheet { email, sheet, upnl }
    }
}

/// Binance reports errors as `{"code": -1022, "msg": "..."}` with a 4xx status.
fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ExchangeError> {
    let status = response.status.as_u16();
    if response.status.is_client_error() && status != 401 && status != 403 {
        if let Ok(body) = response.parse::<ErrorBody>() {
            return Err(ExchangeError::api(body.code, body.msg));
        }
    }
    response.json()
}

#[async_trait::async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> ExchangeId {
        EXCHANGE
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        let spot = self.spot().await?;

        let (flexible, locked, futures, emails) = tokio::join!(
            best_effort(EXCHANGE, "flexible earn", self.flexible_earn()),
            best_effort(EXCHANGE, "locked earn", self.locked_earn()),
            best_effort(EXCHANGE, "futures", self.futures()),
            best_effort(EXCHANGE, "sub-account list", self.sub_account_emails()),
        );

        let mut master = BalanceSheet::new();
        add_spot(&mut master, spot);
        for position in flexible.unwrap_or_default() {
            if position.total_amount > Decimal::ZERO {
                master.add(format!("{}_EARN", position.asset), position.total_amount, None);
            }
        }
        for position in locked.unwrap_or_default() {
            if position.amount > Decimal::ZERO {
                master.add(format!("{}_EARN_LOCKED", position.asset), position.amount, None);
            }
        }
        let upnl = add_futures(&mut master, futures.unwrap_or_default(), "_FUTURES");

        let mut balances = ExchangeBalances::new(EXCHANGE).with_master(master.into_records());
        for (currency, amount) in upnl {
            balances.add_unrealized_pnl(currency, amount);
        }
        let subs = fan_out(
            emails.unwrap_or_default(),
            self.ctx.sub_account_concurrency,
            |email| self.sub_account(email).map(Some),
        )
        .await;
        for sub in subs {
            for (currency, amount) in sub.upnl {
                balances.add_unrealized_pnl(currency, amount);
            }
            balances.insert_sub_account(sub.email, sub.sheet.into_records());
        }

        tracing::debug!(
            exchange = %EXCHANGE,
            master = balances.master.len(),
            sub_accounts = balances.sub_accounts.len(),
            "Fetched balances"
        );
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_reference_vector() {
        assert_eq!(
            sign("test-secret", "timestamp=1700000000000"),
            "dccf2651b1d8329665bfddb0798eccd4650d986a9cfe5547b2f5822131e7620b"
        );
    }

    #[test]
    fn spot_rows_sum_free_and_locked() {
        let mut sheet = BalanceSheet::new();
        add_spot(
            &mut sheet,
            serde_json::from_str(
                r#"[{"asset":"BTC","free":"0.5","locked":"0.25"},
                    {"asset":"DUST","free":"0.00000000","locked":"0.00000000"}]"#,
            )
            .unwrap(),
        );
        let records = sheet.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].currency, "BTC");
        assert_eq!(records[0].amount, Decimal::new(75, 2));
    }

    #[test]
    fn futures_keep_negative_margin() {
        let mut sheet = BalanceSheet::new();
        let upnl = add_futures(
            &mut sheet,
            serde_json::from_str(
                r#"[{"asset":"USDT","marginBalance":"-12.5","unrealizedProfit":"-20"},
                    {"asset":"BNB","marginBalance":"0","unrealizedProfit":"3"}]"#,
            )
            .unwrap(),
            "_FUTURES",
        );
        assert_eq!(upnl, vec![("USDT_FUTURES".to_string(), Decimal::from(-20))]);
        let records = sheet.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].currency, "USDT_FUTURES");
        assert_eq!(records[0].amount, Decimal::new(-125, 1));
    }
}
