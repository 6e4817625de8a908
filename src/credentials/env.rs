//! Process environment credential backend.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

use super::CredentialStore;

/// Reads credentials from environment variables.
///
/// An optional prefix lets several configurations share one environment
/// (`TREASURY_` + `BINANCE_API_KEY`).
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore {
    prefix: String,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        match std::env::var(self.var_name(key)) {
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => {
                anyhow::bail!("Environment variable {} is not valid UTF-8", self.var_name(key))
            }
        }
    }

    async fn set(&self, key: &str, _value: SecretString) -> Result<()> {
        anyhow::bail!(
            "Environment credential store is read-only (cannot set {})",
            self.var_name(key)
        )
    }

    fn supports_write(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn reads_prefixed_variables() -> Result<()> {
        // Unique name so parallel tests never collide.
        std::env::set_var("CEXBOOK_ENV_TEST_KRAKEN_API_KEY", "kraken-key");
        let store = EnvCredentialStore::with_prefix("CEXBOOK_ENV_TEST_");

        let value = store.get("KRAKEN_API_KEY").await?;
        assert_eq!(value.map(|v| v.expose_secret().to_string()), Some("kraken-key".to_string()));
        assert!(store.get("KRAKEN_API_SECRET").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn is_read_only() {
        let store = EnvCredentialStore::new();
        assert!(!store.supports_write());
        assert!(store.set("X", SecretString::from("y".to_string())).await.is_err());
    }
}
