//! Configuration management for PushPop.
//!
//! This module handles loading, saving, and managing PushPop configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/pushpop/config.toml` |
//! | macOS | `~/Library/Application Support/com.pushpop.PushPop/config.toml` |
//! | Windows | `%APPDATA%\pushpop\PushPop\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use pushpop_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Advertising as: {}", config.general.user);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for PushPop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// User name advertised by `push` and claimed by `pop`
    pub user: String,
    /// Default output directory for received files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_output: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            user: local_user(),
            default_output: None,
        }
    }
}

/// Name of the logged-in user, falling back to the host name.
#[must_use]
pub fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
        .or_else(|| {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "pushpop".to_string())
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Sender listen port (0 picks a free port)
    pub port: u16,
    /// How long `pop` waits for a matching offer
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 0,
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes read from the network or disk per step
    pub chunk_size: usize,
    /// Interval between throughput samples
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,
    /// Delay before asking again for a digest that is still being computed
    #[serde(with = "humantime_serde")]
    pub digest_retry_interval: Duration,
    /// Give up after this many "pending" answers (unset: keep polling)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_digest_retries: Option<u32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            progress_interval: Duration::from_millis(100),
            digest_retry_interval: Duration::from_secs(1),
            max_digest_retries: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(Error::ConfigError(
                "transfer.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.transfer.progress_interval.is_zero() {
            return Err(Error::ConfigError(
                "transfer.progress_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "pushpop", "PushPop")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

/// Durations as `"250ms"`, `"10s"` or `"2m"`.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Shortest exact rendering of `duration`.
    pub fn format(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis % 1000 != 0 {
            format!("{millis}ms")
        } else if millis >= 60_000 && millis % 60_000 == 0 {
            format!("{}m", millis / 60_000)
        } else {
            format!("{}s", millis / 1000)
        }
    }

    /// Parse a duration with an `ms`, `s` or `m` suffix.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parsed = if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            return Err(format!("invalid duration '{s}' (use e.g. 500ms, 10s, 2m)"));
        };
        parsed.map_err(|e| format!("invalid duration '{s}': {e}"))
    }
}

pub use humantime_serde::{format as format_duration_setting, parse as parse_duration_setting};
