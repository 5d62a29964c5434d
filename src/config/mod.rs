//! # Configuration Management Module
//!
//! Postbox reads a single TOML file. Every section has defaults, so a missing
//! section (or a missing file during `postbox init`) never blocks startup.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - where the snapshot lives and how many messages it keeps
//! - [`AdmissionConfig`] - write-path quotas (cooldown, rolling window, daily cap)
//! - [`LoggingConfig`] - log level and optional file sinks
//! - [`SecurityConfig`] - Argon2 parameters used when the CLI registers accounts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use postbox::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Data dir: {}", config.storage.data_dir);
//!     println!("Cooldown: {}s", config.admission.cooldown_seconds);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! store_file = "store.json"
//! max_messages = 10000
//!
//! [admission]
//! cooldown_seconds = 30
//! window_seconds = 600
//! window_max = 5
//! daily_max = 200
//! sweep_interval_seconds = 300
//!
//! [logging]
//! level = "info"
//! file = "postbox.log"
//! ```

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Default cap on stored messages; older entries fall off on the next write.
pub const DEFAULT_MAX_MESSAGES: usize = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Snapshot file name, relative to `data_dir`
    #[serde(default = "default_store_file")]
    pub store_file: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_store_file() -> String {
    "store.json".to_string()
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

impl StorageConfig {
    /// Storage rooted at `data_dir` with every other field at its default.
    pub fn in_dir(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Full path of the snapshot file.
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.store_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            store_file: default_store_file(),
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

/// Quotas applied per client identifier on the write path.
///
/// A "day" is the UTC calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Minimum spacing between two accepted events from the same client
    pub cooldown_seconds: u64,
    /// Length of the rolling window
    pub window_seconds: u64,
    /// Accepted events allowed inside one rolling window
    pub window_max: usize,
    /// Accepted events allowed per UTC day
    pub daily_max: u32,
    /// How often idle client state is swept (0 disables the background sweep)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_sweep_interval() -> u64 {
    300
}

/// Upper bound for `cooldown_seconds` and `window_seconds` (one leap year).
pub const MAX_PERIOD_SECONDS: u64 = 366 * 24 * 60 * 60;

impl AdmissionConfig {
    // Clamped so an unvalidated config cannot overflow chrono.
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_seconds.min(MAX_PERIOD_SECONDS) as i64)
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds.min(MAX_PERIOD_SECONDS) as i64)
    }

    /// Idle time after which a client's state can no longer influence a decision,
    /// ignoring the daily counter.
    pub fn idle_horizon(&self) -> Duration {
        self.cooldown().max(self.window())
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_max == 0 {
            return Err(anyhow!("admission.window_max must be at least 1"));
        }
        if self.daily_max == 0 {
            return Err(anyhow!("admission.daily_max must be at least 1"));
        }
        if self.window_seconds == 0 {
            return Err(anyhow!("admission.window_seconds must be at least 1"));
        }
        if self.window_seconds > MAX_PERIOD_SECONDS {
            return Err(anyhow!(
                "admission.window_seconds must be at most {}",
                MAX_PERIOD_SECONDS
            ));
        }
        if self.cooldown_seconds > MAX_PERIOD_SECONDS {
            return Err(anyhow!(
                "admission.cooldown_seconds must be at most {}",
                MAX_PERIOD_SECONDS
            ));
        }
        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 30,
            window_seconds: 10 * 60,
            window_max: 5,
            daily_max: 200,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    /// Admission denials are logged under the `security` target and mirrored here
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("postbox.log".to_string()),
            security_file: Some("postbox-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.admission.validate()?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config {
            security: Some(SecurityConfig::default()),
            ..Config::default()
        };
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_defaults() {
        let cfg = AdmissionConfig::default();
        assert_eq!(cfg.cooldown_seconds, 30);
        assert_eq!(cfg.window_seconds, 600);
        assert_eq!(cfg.window_max, 5);
        assert_eq!(cfg.daily_max, 200);
        assert_eq!(cfg.idle_horizon(), Duration::minutes(10));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/postbox"

            [admission]
            cooldown_seconds = 5
            window_seconds = 60
            window_max = 3
            daily_max = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage.store_file, "store.json");
        assert_eq!(cfg.storage.max_messages, DEFAULT_MAX_MESSAGES);
        assert_eq!(
            cfg.storage.store_path(),
            PathBuf::from("/var/lib/postbox/store.json")
        );
        assert_eq!(cfg.admission.window_max, 3);
        assert_eq!(cfg.admission.sweep_interval_seconds, 300);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_zero_window_max_rejected() {
        let cfg = AdmissionConfig {
            window_max: 0,
            ..AdmissionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_oversized_periods_rejected_and_clamped() {
        let cfg = AdmissionConfig {
            window_seconds: u64::MAX,
            ..AdmissionConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.window(), Duration::seconds(MAX_PERIOD_SECONDS as i64));

        let cfg = AdmissionConfig {
            cooldown_seconds: i64::MAX as u64 / 1000 + 1,
            ..AdmissionConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.idle_horizon(), Duration::seconds(MAX_PERIOD_SECONDS as i64));

        let cfg = AdmissionConfig {
            cooldown_seconds: MAX_PERIOD_SECONDS,
            window_seconds: MAX_PERIOD_SECONDS,
            ..AdmissionConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let cfg = Config::load(path).await.unwrap();
        assert_eq!(cfg.admission, AdmissionConfig::default());
        assert!(cfg.security.is_some());
    }
}
