//! KuCoin account and sub-user balances (API key version 2).

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::de::decimal;
use super::signing::hmac_sha256_base64;
use super::{best_effort, encode_query, fan_out, AdapterContext, ExchangeAdapter, ExchangeError};
use crate::credentials::ExchangeCredentials;
use crate::models::{BalanceSheet, ExchangeBalances, ExchangeId};

const API_BASE: &str = "https://api.kucoin.com";
const EXCHANGE: ExchangeId = ExchangeId::Kucoin;
const SUCCESS: &str = "200000";
const PAGE_SIZE: u32 = 100;

/// Sign `timestamp + METHOD + endpoint + body`, base64 encoded.
pub fn sign(secret: &str, timestamp: i64, method: &str, endpoint: &str, body: &str) -> String {
    hmac_sha256_base64(secret, &format!("{timestamp}{method}{endpoint}{body}"))
}

/// Key version 2 sends the passphrase HMAC'd with the secret, never in clear.
pub fn sign_passphrase(secret: &str, passphrase: &str) -> String {
    hmac_sha256_base64(secret, passphrase)
}

pub struct KucoinAdapter {
    credentials: ExchangeCredentials,
    ctx: AdapterContext,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    currency: String,
    #[serde(default, deserialize_with = "decimal")]
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubUserPage {
    #[serde(default)]
    current_page: u32,
    #[serde(default)]
    total_page: u32,
    #[serde(default)]
    items: Vec<SubUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubUser {
    user_id: String,
    #[serde(default)]
    sub_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubAccountBalances {
    #[serde(default)]
    main_accounts: Vec<AccountRow>,
    #[serde(default)]
    trade_accounts: Vec<AccountRow>,
    #[serde(default)]
    margin_accounts: Vec<AccountRow>,
}

/// Sum rows per currency. Several ledgers can hold the same coin.
fn sheet_from(rows: impl IntoIterator<Item = AccountRow>) -> BalanceSheet {
    let mut sheet = BalanceSheet::new();
    for row in rows {
        if row.balance > Decimal::ZERO {
            sheet.add(row.currency, row.balance, None);
        }
    }
    sheet
}

impl KucoinAdapter {
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
    ) -> Result<T, ExchangeError> {
        let query = encode_query(params);
        let endpoint = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let url = format!("{}{endpoint}", self.base_url);
        let secret = self.credentials.api_secret.expose_secret();
        let passphrase = sign_passphrase(secret, self.credentials.passphrase_or_empty());

        let response = self
            .ctx
            .http
            .send(EXCHANGE, |client| {
                let timestamp = self.ctx.clock.now_millis();
                client
                    .get(&url)
                    .header("KC-API-KEY", &self.credentials.api_key)
                    .header("KC-API-SIGN", sign(secret, timestamp, "GET", &endpoint, ""))
                    .header("KC-API-TIMESTAMP", timestamp.to_string())
                    .header("KC-API-PASSPHRASE", &passphrase)
                    .header("KC-API-KEY-VERSION", "2")
            })
            .await?;

        let envelope: Envelope<T> = response.envelope(|body: &Envelope<T>| {
            if body.code == SUCCESS {
                Ok(())
            } else {
                Err(ExchangeError::api(&body.code, body.msg.clone()))
            }
        })?;
        envelope
            .data
            .ok_or_else(|| ExchangeError::malformed("missing data"))
    }

    async fn sub_users(&self) -> Result<Vec<SubUser>, ExchangeError> {
        let mut users = Vec::new();
        let mut page = 1;
        loop {
            let result: SubUserPage = self
                .get(
                    "/api/v2/sub/user",
                    &[
                        ("currentPage", page.to_string()),
                        ("pageSize", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let done = result.items.is_empty() || result.current_page.max(page) >= result.total_page;
            users.extend(result.items);
            if done {
                return Ok(users);
            }
            page += 1;
        }
    }

    async fn sub_user(&self, user: SubUser) -> Option<(String, BalanceSheet)> {
        let balances: SubAccountBalances = best_effort(
            EXCHANGE,
            "sub-account balance",
            self.get(&format!("/api/v1/sub-accounts/{}", user.user_id), &[]),
        )
        .await?;
        let sheet = sheet_from(
            balances
                .main_accounts
                .into_iter()
                .chain(balances.trade_accounts)
                .chain(balances.margin_accounts),
        );
        let name = user.sub_name.filter(|n| !n.is_empty()).unwrap_or(user.user_id);
        Some((name, sheet))
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for KucoinAdapter {
    fn exchange(&self) -> ExchangeId {
        EXCHANGE
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        let rows: Vec<AccountRow> = self.get("/api/v1/accounts", &[]).await?;
        let mut balances =
            ExchangeBalances::new(EXCHANGE).with_master(sheet_from(rows).into_records());

        let users = best_effort(EXCHANGE, "sub-user list", self.sub_users())
            .await
            .unwrap_or_default();
        let subs = fan_out(users, self.ctx.sub_account_concurrency, |user| {
            self.sub_user(user)
        })
        .await;
        for (name, sheet) in subs {
            balances.insert_sub_account(name, sheet.into_records());
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_reference_vector() {
        assert_eq!(
            sign("test-secret", 1_700_000_000_000, "GET", "/api/v1/accounts", ""),
            "9eOa619WY+scedBCdg8jUC0RJVKphitSmYUHu5N1Cc0="
        );
    }

    #[test]
    fn passphrase_is_signed() {
        assert_eq!(
            sign_passphrase("test-secret", "test-pass"),
            "+KGfNXdTCAFagUD1lg/kgwlqIgMFeba97YWwVk6avzw="
        );
    }

    #[test]
    fn same_currency_rows_are_summed() {
        let rows: Vec<AccountRow> = serde_json::from_str(
            r#"[{"currency":"USDT","type":"main","balance":"100"},
                {"currency":"USDT","type":"trade","balance":"50"},
                {"currency":"KCS","type":"trade","balance":"0"}]"#,
        )
        .unwrap();
        let records = sheet_from(rows).into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].currency, "USDT");
        assert_eq!(records[0].amount, Decimal::from(150));
    }
}
