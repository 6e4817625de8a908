//! Credential storage and per-exchange credential resolution.
//!
//! Exchange API keys are read from a [`CredentialStore`] using
//! environment-style key names:
//!
//! ```text
//! BINANCE_API_KEY / BINANCE_API_SECRET
//! OKX_API_KEY / OKX_API_SECRET / OKX_PASSPHRASE
//! ```
//!
//! [`resolve_credentials`] turns those into one [`ExchangeCredentials`]
//! bundle per exchange whose required fields are all present.

mod env;
mod memory;
mod resolver;

pub use env::EnvCredentialStore;
pub use memory::MemoryCredentialStore;
pub use resolver::{resolve_credentials, ExchangeCredentials, SubAccountCredentials};

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

/// Source of raw credential values, looked up by key name.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the key is unset; `Err` only when the backend itself fails.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;

    /// Store a value. Read-only backends return an error.
    async fn set(&self, key: &str, value: SecretString) -> Result<()>;

    fn supports_write(&self) -> bool {
        true
    }
}
