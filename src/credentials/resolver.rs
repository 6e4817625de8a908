//! Maps configured secret values to per-exchange credential bundles.

use std::fmt;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

use super::CredentialStore;
use crate::models::ExchangeId;

/// API credentials for one exchange.
pub struct ExchangeCredentials {
    pub exchange: ExchangeId,
    pub api_key: String,
    pub api_secret: SecretString,
    /// Required for OKX and KuCoin, unused elsewhere.
    pub passphrase: Option<SecretString>,
    /// Dedicated key for a single sub-account (Bybit only).
    pub sub_account: Option<SubAccountCredentials>,
}

/// Credentials issued by a sub-account itself rather than the master.
pub struct SubAccountCredentials {
    pub name: String,
    pub api_key: String,
    pub api_secret: SecretString,
}

impl ExchangeCredentials {
    pub fn new(exchange: ExchangeId, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            exchange,
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
            passphrase: None,
            sub_account: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::from(passphrase.into()));
        self
    }

    pub fn with_sub_account(mut self, sub_account: SubAccountCredentials) -> Self {
        self.sub_account = Some(sub_account);
        self
    }

    /// The passphrase, or an empty string for exchanges that have none.
    pub fn passphrase_or_empty(&self) -> &str {
        self.passphrase
            .as_ref()
            .map(|p| p.expose_secret())
            .unwrap_or("")
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("exchange", &self.exchange)
            .field("api_key", &self.api_key)
            .field("has_passphrase", &self.passphrase.is_some())
            .field(
                "sub_account",
                &self.sub_account.as_ref().map(|s| s.name.as_str()),
            )
            .finish_non_exhaustive()
    }
}

/// Read a key and treat blank values as missing.
async fn non_blank(store: &dyn CredentialStore, key: &str) -> Result<Option<SecretString>> {
    let value = store
        .get(key)
        .await
        .with_context(|| format!("Failed to read credential {key}"))?;
    Ok(value.filter(|v| !v.expose_secret().trim().is_empty()))
}

async fn resolve_one(
    store: &dyn CredentialStore,
    exchange: ExchangeId,
) -> Result<Option<ExchangeCredentials>> {
    let prefix = exchange.env_prefix();
    let api_key = non_blank(store, &format!("{prefix}_API_KEY")).await?;
    let api_secret = non_blank(store, &format!("{prefix}_API_SECRET")).await?;
    let passphrase = if exchange.requires_passphrase() {
        match non_blank(store, &format!("{prefix}_PASSPHRASE")).await? {
            Some(p) => Some(p),
            None => {
                tracing::debug!(exchange = %exchange, "Passphrase missing; exchange skipped");
                return Ok(None);
            }
        }
    } else {
        None
    };

    let (Some(api_key), Some(api_secret)) = (api_key, api_secret) else {
        tracing::debug!(exchange = %exchange, "Credentials incomplete; exchange skipped");
        return Ok(None);
    };

    let sub_account = if exchange == ExchangeId::Bybit {
        resolve_bybit_sub_account(store).await?
    } else {
        None
    };

    Ok(Some(ExchangeCredentials {
        exchange,
        api_key: api_key.expose_secret().trim().to_string(),
        api_secret,
        passphrase,
        sub_account,
    }))
}

async fn resolve_bybit_sub_account(
    store: &dyn CredentialStore,
) -> Result<Option<SubAccountCredentials>> {
    let api_key = non_blank(store, "BYBIT_SUB_API_KEY").await?;
    let api_secret = non_blank(store, "BYBIT_SUB_API_SECRET").await?;
    let (Some(api_key), Some(api_secret)) = (api_key, api_secret) else {
        return Ok(None);
    };
    let name = non_blank(store, "BYBIT_SUB_NAME")
        .await?
        .map(|n| n.expose_secret().trim().to_string())
        .unwrap_or_else(|| "subaccount".to_string());

    Ok(Some(SubAccountCredentials {
        name,
        api_key: api_key.expose_secret().trim().to_string(),
        api_secret,
    }))
}

/// Return credentials for every exchange whose required fields are all
/// present and non-blank.
///
/// Incomplete groups are skipped silently: missing configuration is not a
/// runtime failure. Errors reading the store itself are returned.
pub async fn resolve_credentials(store: &dyn CredentialStore) -> Result<Vec<ExchangeCredentials>> {
    let mut resolved = Vec::new();
    for exchange in ExchangeId::ALL {
        if let Some(credentials) = resolve_one(store, exchange).await? {
            resolved.push(credentials);
        }
    }
    Ok(resolved)
}
