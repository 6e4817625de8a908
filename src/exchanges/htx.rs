//! HTX (formerly Huobi) account balances, signature version 2.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::de::decimal;
use super::signing::hmac_sha256_base64;
use super::{best_effort, AdapterContext, ExchangeAdapter, ExchangeError};
use crate::credentials::ExchangeCredentials;
use crate::models::{BalanceSheet, ExchangeBalances, ExchangeId};

const API_BASE: &str = "https://api.huobi.pro";
const EXCHANGE: ExchangeId = ExchangeId::Htx;

/// Build the sorted, encoded parameter string that HTX signs.
pub fn canonical_query(api_key: &str, timestamp: DateTime<Utc>, extra: &[(&str, String)]) -> String {
    let mut params: Vec<(String, String)> = vec![
        ("AccessKeyId".into(), api_key.to_string()),
        ("SignatureMethod".into(), "HmacSHA256".into()),
        ("SignatureVersion".into(), "2".into()),
        (
            "Timestamp".into(),
            timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ),
    ];
    params.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));
    params.sort();
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign `METHOD\nhost\npath\nquery`, base64 encoded.
pub fn sign(secret: &str, method: &str, host: &str, path: &str, query: &str) -> String {
    hmac_sha256_base64(secret, &format!("{method}\n{host}\n{path}\n{query}"))
}

/// Host of a base URL as HTX signs it, with the port when it is not the
/// scheme's default.
fn host_of(base_url: &str) -> Result<String, ExchangeError> {
    let invalid = || ExchangeError::InvalidEndpoint(base_url.to_string());
    let url = reqwest::Url::parse(base_url).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?.to_ascii_lowercase();
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Currency key for a balance row held in an account of `account_type`.
fn currency_key(currency: &str, account_type: &str) -> String {
    let currency = currency.to_ascii_uppercase();
    if account_type == "spot" {
        currency
    } else {
        format!(
            "{currency}_{}",
            account_type.to_ascii_uppercase().replace('-', "_")
        )
    }
}

pub struct HtxAdapter {
    credentials: ExchangeCredentials,
    ctx: AdapterContext,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(rename = "err-code", default)]
    err_code: Option<String>,
    #[serde(rename = "err-msg", default)]
    err_msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: u64,
    #[serde(rename = "type")]
    account_type: String,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    #[serde(default)]
    list: Vec<BalanceRow>,
}

#[derive(Debug, Deserialize)]
struct BalanceRow {
    currency: String,
    #[serde(default, deserialize_with = "decimal")]
    balance: Decimal,
}

impl HtxAdapter {
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

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let host = host_of(&self.base_url)?;
        let response = self
            .ctx
            .http
            .send(EXCHANGE, |client| {
                let query = canonical_query(&self.credentials.api_key, self.ctx.clock.now(), &[]);
                let signature = sign(
                    self.credentials.api_secret.expose_secret(),
                    "GET",
                    &host,
                    path,
                    &query,
                );
                client.get(format!(
                    "{}{path}?{query}&Signature={}",
                    self.base_url,
                    urlencoding::encode(&signature)
                ))
            })
            .await?;

        let envelope: Envelope<T> = response.envelope(|body: &Envelope<T>| {
            if body.status == "ok" {
                Ok(())
            } else {
                Err(ExchangeError::api(
                    body.err_code.as_deref().unwrap_or(&body.status),
                    body.err_msg.clone().unwrap_or_default(),
                ))
            }
        })?;
        envelope
            .data
            .ok_or_else(|| ExchangeError::malformed("missing data"))
    }

    async fn balance(&self, account: &Account) -> Result<Vec<BalanceRow>, ExchangeError> {
        let balance: AccountBalance = self
            .get(&format!("/v1/account/accounts/{}/balance", account.id))
            .await?;
        Ok(balance.list)
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for HtxAdapter {
    fn exchange(&self) -> ExchangeId {
        EXCHANGE
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        let accounts: Vec<Account> = self.get("/v1/account/accounts").await?;

        let mut sheet = BalanceSheet::new();
        for account in &accounts {
            // Spot is the primary wallet; other account types are supplementary.
            let rows = if account.account_type == "spot" {
                self.balance(account).await?
            } else {
                best_effort(EXCHANGE, &account.account_type, self.balance(account))
                    .await
                    .unwrap_or_default()
            };
            for row in rows {
                if row.balance > Decimal::ZERO {
                    sheet.add(
                        currency_key(&row.currency, &account.account_type),
                        row.balance,
                        None,
                    );
                }
            }
        }
        Ok(ExchangeBalances::new(EXCHANGE).with_master(sheet.into_records()))
    }
}
