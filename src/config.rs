use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime tunables, loaded from a TOML file. Every field has a default so
/// a missing file or a partial file both work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display name override for the local user.
    pub display_name: Option<String>,
    /// How long a typing-presence record stays visible without a refresh.
    pub typing_expiry_ms: u64,
    /// Minimum gap between typing rebroadcasts while composing.
    pub typing_throttle_ms: u64,
    /// Initial delay before a dropped subscription re-subscribes.
    pub reconnect_backoff_ms: u64,
    /// Cap for the exponential reconnect backoff.
    pub max_reconnect_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: None,
            typing_expiry_ms: 5_000,
            typing_throttle_ms: 1_500,
            reconnect_backoff_ms: 500,
            max_reconnect_backoff_ms: 8_000,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `path` is None.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }

    pub fn typing_throttle(&self) -> Duration {
        Duration::from_millis(self.typing_throttle_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn max_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_backoff_ms)
    }
}

/// Default config location: `<config dir>/alumchat/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|base| base.join("alumchat").join("config.toml"))
}
