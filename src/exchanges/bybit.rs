//! Bybit V5 and its Zoomex clone.
//!
//! Both venues sign `timestamp + apiKey + recvWindow + query` with
//! HMAC-SHA256 and report failures through `retCode` in a 200 response.

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::de::{decimal, optional_decimal};
use super::signing::hmac_sha256_hex;
use super::{best_effort, encode_query, fan_out, AdapterContext, ExchangeAdapter, ExchangeError};
use crate::credentials::ExchangeCredentials;
use crate::models::{BalanceSheet, ExchangeBalances, ExchangeId};

const RECV_WINDOW: &str = "5000";

/// Coins queried for sub-members enumerated through the master key.
const SUB_MEMBER_COINS: &str = "BTC,ETH,USDT,USDC,USDE,XRP,SOL,DOGE,ADA,AVAX";

/// Sign a Bybit-style request.
pub fn sign(secret: &str, timestamp: i64, api_key: &str, recv_window: &str, query: &str) -> String {
    hmac_sha256_hex(secret, &format!("{timestamp}{api_key}{recv_window}{query}"))
}

/// Which deployment of the Bybit protocol an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BybitVenue {
    Bybit,
    Zoomex,
}

impl BybitVenue {
    pub fn exchange(self) -> ExchangeId {
        match self {
            BybitVenue::Bybit => ExchangeId::Bybit,
            BybitVenue::Zoomex => ExchangeId::Zoomex,
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            BybitVenue::Bybit => "https://api.bybit.com",
            BybitVenue::Zoomex => "https://openapi.zoomex.com",
        }
    }

    fn wallet_path(self) -> &'static str {
        match self {
            BybitVenue::Bybit => "/v5/account/wallet-balance",
            BybitVenue::Zoomex => "/cloud/trade/v3/account/wallet-balance",
        }
    }
}

pub struct BybitAdapter {
    venue: BybitVenue,
    credentials: ExchangeCredentials,
    ctx: AdapterContext,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WalletResult {
    #[serde(default)]
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default, deserialize_with = "decimal")]
    wallet_balance: Decimal,
    #[serde(default, deserialize_with = "optional_decimal")]
    usd_value: Option<Decimal>,
    #[serde(default, deserialize_with = "decimal")]
    unrealised_pnl: Decimal,
}

/// A unified wallet and the unrealized PnL held within it.
struct Wallet {
    sheet: BalanceSheet,
    upnl: Vec<(String, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct CoinsBalanceResult {
    #[serde(default)]
    balance: Vec<CoinBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinBalance {
    coin: String,
    #[serde(default, deserialize_with = "decimal")]
    wallet_balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubMembersResult {
    #[serde(default)]
    sub_members: Vec<SubMember>,
}

#[derive(Debug, Deserialize)]
struct SubMember {
    uid: serde_json::Value,
    #[serde(default)]
    username: Option<String>,
}

impl SubMember {
    fn uid(&self) -> String {
        match &self.uid {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Key pair used to sign a request.
struct Signer<'a> {
    api_key: &'a str,
    api_secret: &'a SecretString,
}

impl BybitAdapter {
    pub fn new(venue: BybitVenue, credentials: ExchangeCredentials, ctx: AdapterContext) -> Self {
        Self {
            venue,
            credentials,
            ctx,
            base_url: venue.default_base_url().to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn master_signer(&self) -> Signer<'_> {
        Signer {
            api_key: &self.credentials.api_key,
            api_secret: &self.credentials.api_secret,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        signer: &Signer<'_>,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = encode_query(params);
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };
        let response = self
            .ctx
            .http
            .send(self.venue.exchange(), |client| {
                let timestamp = self.ctx.clock.now_millis();
                let signature = sign(
                    signer.api_secret.expose_secret(),
                    timestamp,
                    signer.api_key,
                    RECV_WINDOW,
                    &query,
                );
                client
                    .get(&url)
                    .header("X-BAPI-API-KEY", signer.api_key)
                    .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                    .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
                    .header("X-BAPI-SIGN", signature)
            })
            .await?;

        let envelope: Envelope<T> = response.envelope(|body: &Envelope<T>| {
            if body.ret_code == 0 {
                Ok(())
            } else {
                Err(ExchangeError::api(body.ret_code, body.ret_msg.clone()))
            }
        })?;
        envelope
            .result
            .ok_or_else(|| ExchangeError::malformed("missing result"))
    }

    async fn wallet(&self, signer: &Signer<'_>) -> Result<Wallet, ExchangeError> {
        let result: WalletResult = self
            .get(
                signer,
                self.venue.wallet_path(),
                &[("accountType", "UNIFIED".to_string())],
            )
            .await?;

        let mut wallet = Wallet {
            sheet: BalanceSheet::new(),
            upnl: Vec::new(),
        };
        for coin in result.list.into_iter().take(1).flat_map(|a| a.coin) {
            if coin.wallet_balance > Decimal::ZERO {
                if !coin.unrealised_pnl.is_zero() {
                    wallet.upnl.push((coin.coin.clone(), coin.unrealised_pnl));
                }
                wallet.sheet.add(coin.coin, coin.wallet_balance, coin.usd_value);
            }
        }
        Ok(wallet)
    }

    async fn coins_balance(
        &self,
        params: &[(&str, String)],
    ) -> Result<Vec<CoinBalance>, ExchangeError> {
        let result: CoinsBalanceResult = self
            .get(
                &self.master_signer(),
                "/v5/asset/transfer/query-account-coins-balance",
                params,
            )
            .await?;
        Ok(result
            .balance
            .into_iter()
            .filter(|c| c.wallet_balance > Decimal::ZERO)
            .collect())
    }

    async fn fund(&self) -> Result<Vec<CoinBalance>, ExchangeError> {
        self.coins_balance(&[("accountType", "FUND".to_string())])
            .await
    }

    async fn sub_members(&self) -> Result<Vec<SubMember>, ExchangeError> {
        let result: SubMembersResult = self
            .get(&self.master_signer(), "/v5/user/query-sub-members", &[])
            .await?;
        Ok(result.sub_members)
    }

    async fn sub_member(&self, member: SubMember) -> Option<(String, BalanceSheet)> {
        let uid = member.uid();
        let coins = best_effort(
            self.venue.exchange(),
            "sub-member balance",
            self.coins_balance(&[
                ("accountType", "UNIFIED".to_string()),
                ("memberId", uid.clone()),
                ("coin", SUB_MEMBER_COINS.to_string()),
            ]),
        )
        .await?;

        let mut sheet = BalanceSheet::new();
        for coin in coins {
            sheet.add(coin.coin, coin.wallet_balance, None);
        }
        Some((member.username.filter(|n| !n.is_empty()).unwrap_or(uid), sheet))
    }

    /// Sub-account sheets, plus the unrealized PnL of a dedicated sub-account key.
    async fn sub_accounts(&self) -> (Vec<(String, BalanceSheet)>, Vec<(String, Decimal)>) {
        let exchange = self.venue.exchange();
        if let Some(sub) = &self.credentials.sub_account {
            let signer = Signer {
                api_key: &sub.api_key,
                api_secret: &sub.api_secret,
            };
            return match best_effort(exchange, "sub-account wallet", self.wallet(&signer)).await {
                Some(wallet) => (vec![(sub.name.clone(), wallet.sheet)], wallet.upnl),
                None => (Vec::new(), Vec::new()),
            };
        }

        let members = best_effort(exchange, "sub-member list", self.sub_members())
            .await
            .unwrap_or_default();
        let sheets = fan_out(members, self.ctx.sub_account_concurrency, |member| {
            self.sub_member(member)
        })
        .await;
        (sheets, Vec::new())
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn exchange(&self) -> ExchangeId {
        self.venue.exchange()
    }

    async fn fetch_balances(&self) -> Result<ExchangeBalances, ExchangeError> {
        let Wallet {
            sheet: mut master,
            upnl,
        } = self.wallet(&self.master_signer()).await?;
        let mut balances = ExchangeBalances::new(self.venue.exchange());
        for (currency, amount) in upnl {
            balances.add_unrealized_pnl(currency, amount);
        }

        if self.venue == BybitVenue::Bybit {
            let (fund, (subs, sub_upnl)) = tokio::join!(
                best_effort(ExchangeId::Bybit, "fund account", self.fund()),
                self.sub_accounts(),
            );
            for coin in fund.unwrap_or_default() {
                master.add(format!("{}_FUND", coin.coin), coin.wallet_balance, None);
            }
            for (name, sheet) in subs {
                balances.insert_sub_account(name, sheet.into_records());
            }
            for (currency, amount) in sub_upnl {
                balances.add_unrealized_pnl(currency, amount);
            }
        }

        balances.master = master.into_records();
        Ok(balances)
    }
}
