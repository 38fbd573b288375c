//! Host configuration.
//!
//! Values come from defaults, then an optional JSON file, then `OWNABLES_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

const ENV_DATA_DIR: &str = "OWNABLES_DATA_DIR";
const ENV_ANCHORING: &str = "OWNABLES_ANCHORING";
const ENV_LEDGER_URL: &str = "OWNABLES_LEDGER_URL";
const ENV_ORIGIN: &str = "OWNABLES_ORIGIN";
const ENV_STORAGE_RETRIES: &str = "OWNABLES_STORAGE_RETRIES";
const ENV_CALL_TIMEOUT_MS: &str = "OWNABLES_CALL_TIMEOUT_MS";
const ENV_NETWORK_ID: &str = "OWNABLES_NETWORK_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for instance state and packages.
    pub data_dir: PathBuf,
    /// Submit chain anchors to the ledger after each state change.
    pub anchoring: bool,
    pub ledger_url: Option<Url>,
    /// The only origin sandbox frames accept calls from.
    pub origin: String,
    /// Attempts after the first for transient storage faults.
    pub storage_retries: u32,
    pub call_timeout_ms: u64,
    pub network_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            anchoring: false,
            ledger_url: None,
            origin: "ownables://host".to_string(),
            storage_retries: 3,
            call_timeout_ms: 30_000,
            network_id: "T".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("ownables"))
        .unwrap_or_else(|| PathBuf::from(".ownables"))
}

impl Config {
    /// Read `path` and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults with environment overrides.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_ANCHORING) {
            self.anchoring = parse_bool(ENV_ANCHORING, &value)?;
        }
        if let Some(value) = lookup(ENV_LEDGER_URL) {
            let url = Url::parse(&value)
                .map_err(|e| Error::Config(format!("{}: {}", ENV_LEDGER_URL, e)))?;
            self.ledger_url = Some(url);
        }
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(value) = lookup(ENV_STORAGE_RETRIES) {
            self.storage_retries = parse_number(ENV_STORAGE_RETRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_CALL_TIMEOUT_MS) {
            self.call_timeout_ms = parse_number(ENV_CALL_TIMEOUT_MS, &value)?;
        }
        if let Some(network) = lookup(ENV_NETWORK_ID) {
            self.network_id = network;
        }
        Ok(self)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Directory holding instance partitions.
    pub fn instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }

    /// Directory holding imported packages.
    pub fn packages_dir(&self) -> PathBuf {
        self.data_dir.join("packages")
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{}: expected a boolean, got {:?}", key, value))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", key, e)))
}
