//! OKX V5 trading account and sub-account balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::de::{decimal, optional_decimal};
use super::signing::hmac_sha256_base64;
use super::{best_effort, encode_query, fan_out, AdapterContext, ExchangeAdapter, ExchangeError};
use crate::credentials::ExchangeCredentials;
use crate::models::{BalanceSheet, ExchangeBalances, ExchangeId};

const API_BASE: &str = "https://www.okx.com";
const EXCHANGE: ExchangeId = ExchangeId::Okx;

/// OKX wants an ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Sign `timestamp + METHOD + requestPath + body`, base64 encoded.
pub fn sign(secret: &str, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
    hmac_sha256_base64(secret, &format!("{timestamp}{method}{request_path}{body}"))
}

pub struct OkxAdapter {
    credentials: ExchangeCredentials,
    ctx: AdapterContext,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    #[serde(default)]
    details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDetail {
    ccy: String,
    #[serde(default, deserialize_with = "decimal")]
    cash_bal: Decimal,
    #[serde(default, deserialize_with = "optional_decimal")]
    eq_usd: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubAccountInfo {
    sub_acct: String,
}

fn sheet_from(data: Vec<AccountBalance>) -> BalanceSheet {
    let mut sheet = BalanceSheet::new();
    for detail in data.into_iter().take(1).flat_map(|b| b.details) {
        if detail.cash_bal > Decimal::ZERO {
            let usd = detail.eq_usd.filter(|usd| *usd > Decimal::ZERO);
            sheet.add(detail.ccy, detail.cash_bal, usd);
        }
    }
    sheet
}

impl OkxAdapter {
    pub fn new(credentials: ExchangeCredentials, ctx: AdapterContext) -> Self {
        Self {
            credentials,
            ctx,
            base_url: API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, ExchangeError> {
        let query = encode_query(params);
        let request_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let url = format!("{}{request_path}", self.base_url);

        let response = self
            .ctx
            .http
            .send(EXCHANGE, |client| {
                let ts = timestamp(self.ctx.clock.now());
                let signature = sign(
                    self.credentials.api_secret.expose_secret(),
                    &ts,
                    "GET",
                    &request_path,
                    "",
                );
                client
                    .get(&url)
                    .header("OK-ACCESS-KEY", &self.credentials.api_key)
                    .header("OK-ACCESS-SIGN", signature)
                    .header("OK-ACCESS-TIMESTAMP", ts)
                    .header("OK-ACCESS-PASSPHRASE", self.credentials.passphrase_or_empty())
            })
            .await?;

        let envelope: Envelope<T> = response.envelope(|body: &Envelope<T>| {
            if body.code == "0" {
                Ok(())
            } else {
                Err(ExchangeError::api(&body.code, body.msg.clone()))
            }
        })?;
        Ok(envelope.data)
    }

    async fn sub_account_names(&self) -> Result<Vec<String>, ExchangeError> {
        let subs: Vec<SubAccountInfo> = self.get("/api/v5/users/subaccount/list", &[]).await?;
        Ok(subs.into_iter().map(|s| s.sub_acct).collect())
    }

    async fn sub_account(&self, name: String) -> Option<(String, BalanceSheet)> {
        let data = best_effort(
            EXCHANGE,
            "sub-account balance",
            self.get::<AccountBalance>(
                "/api/v5/account/subaccount/balances",
                &[("subAcct", name.clone())],
            ),
        )
        .await?;
        Some((name, sheet_from(data)))
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn exchange(&self) -> ExchangeId {
        EXCHANGE
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        let data: Vec<AccountBalance> = self.get("/api/v5/account/balance", &[]).await?;
        let mut balances =
            ExchangeBalances::new(EXCHANGE).with_master(sheet_from(data).into_records());

        let names = best_effort(EXCHANGE, "sub-account list", self.sub_account_names())
            .await
            .unwrap_or_default();
        let subs = fan_out(names, self.ctx.sub_account_concurrency, |name| {
            self.sub_account(name)
        })
        .await;
        for (name, sheet) in subs {
            balances.insert_sub_account(name, sheet.into_records());
        }
        Ok(balances)
    }
}
