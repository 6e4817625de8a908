use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::models::ExchangeId;

/// Outbound HTTP settings shared by every exchange adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,

    /// Retries for transport errors and 5xx responses. 4xx responses are
    /// never retried.
    pub max_retries: u32,

    /// Delay before the first retry; grows linearly with each attempt.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub retry_backoff: Duration,

    /// Sub-accounts of one exchange fetched at the same time.
    pub sub_account_concurrency: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
            retry_backoff: Duration::from_millis(250),
            sub_account_concurrency: 4,
        }
    }
}

/// Presentation thresholds applied to the aggregate output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Number of coins given a dedicated column in the coin table.
    pub top_coins: usize,

    /// Sub-accounts worth less than this (in absolute USD) keep their total
    /// but have their per-currency breakdown omitted.
    pub min_subaccount_usd: Decimal,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            top_coins: 8,
            min_subaccount_usd: Decimal::ONE,
        }
    }
}

fn default_snapshot_timezone() -> String {
    "Asia/Singapore".to_string()
}

/// Snapshot history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// IANA timezone whose calendar date keys each snapshot.
    #[serde(default = "default_snapshot_timezone")]
    pub timezone: String,

    /// Default number of snapshots returned by history queries.
    pub history_limit: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            timezone: default_snapshot_timezone(),
            history_limit: 90,
        }
    }
}

/// Which document store backs the loan and locked-token ledgers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentBackend {
    /// JSON files under the data directory.
    #[default]
    File,
    /// The GitHub contents API of a repository.
    Github,
}

fn default_github_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub backend: DocumentBackend,

    /// `owner/name` of the repository holding ledger documents.
    pub repo: Option<String>,

    #[serde(default = "default_github_branch")]
    pub branch: String,

    /// Override for the GitHub API base URL.
    pub api_base: Option<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            backend: DocumentBackend::File,
            repo: None,
            branch: default_github_branch(),
            api_base: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    pub http: HttpConfig,

    pub display: DisplayConfig,

    pub snapshots: SnapshotConfig,

    /// Base URL overrides keyed by exchange (e.g. `okx = "https://aws.okx.com"`).
    pub endpoints: BTreeMap<String, String>,

    pub documents: DocumentsConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths and parsed timezone.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub http: HttpConfig,
    pub display: DisplayConfig,
    pub snapshots: SnapshotConfig,
    pub snapshot_timezone: Tz,
    pub endpoints: BTreeMap<ExchangeId, String>,
    pub documents: DocumentsConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./cexbook.toml` if it exists in current directory
/// 2. `<config dir>/cexbook/cexbook.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("cexbook.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cexbook").join("cexbook.toml");
    }

    local_config
}

impl ResolvedConfig {
    fn resolve(config: Config, config_dir: &Path) -> Result<Self> {
        let data_dir = config.resolve_data_dir(config_dir);
        let snapshot_timezone: Tz = config
            .snapshots
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| {
                format!("Invalid snapshot timezone: {}", config.snapshots.timezone)
            })?;

        let endpoints = config
            .endpoints
            .iter()
            .map(|(exchange, url)| Ok((exchange.parse::<ExchangeId>()?, url.clone())))
            .collect::<Result<BTreeMap<_, _>>>()
            .context("Invalid [endpoints] section")?;

        Ok(Self {
            data_dir,
            http: config.http,
            display: config.display,
            snapshots: config.snapshots,
            snapshot_timezone,
            endpoints,
            documents: config.documents,
        })
    }

    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Self::resolve(config, config_dir)
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    ///
    /// Without a file, the intended config directory becomes the data directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        Self::resolve(Config::default(), config_dir)
    }

    /// Base URL override configured for an exchange.
    pub fn endpoint(&self, exchange: ExchangeId) -> Option<&str> {
        self.endpoints.get(&exchange).map(String::as_str)
    }
}
