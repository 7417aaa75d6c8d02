//! Application configuration management.
//!
//! This module handles loading and saving the session configuration: backend
//! location, renewal timing and which durable store holds the credential.
//!
//! Configuration is stored at `~/.config/sessionkeeper/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `backend_url`
pub const BACKEND_URL_ENV: &str = "SESSIONKEEPER_BACKEND_URL";

const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Renew once fewer than this many seconds of validity remain
const DEFAULT_RENEWAL_THRESHOLD_SECS: u64 = 5 * 60;

/// Activity check cadence
const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the credential is kept between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub renewal_threshold_secs: u64,
    pub tick_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    /// Keychain account name when `storage` is `keyring`
    pub keyring_account: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            renewal_threshold_secs: DEFAULT_RENEWAL_THRESHOLD_SECS,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            keyring_account: "default".to_string(),
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                config.backend_url = url;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject timings the renewer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than zero");
        }
        if self.renewal_threshold_secs == 0 {
            anyhow::bail!("renewal_threshold_secs must be greater than zero");
        }
        if self.backend_url.trim().is_empty() {
            anyhow::bail!("backend_url must not be empty");
        }
        Ok(())
    }

    pub fn renewal_threshold(&self) -> Duration {
        Duration::from_secs(self.renewal_threshold_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
