//! cloudtask configuration
//!
//! A task manager can be described in a TOML file:
//!
//! ```toml
//! name = "openstack"
//! workers = 8
//! log_level = "debug"
//!
//! # Either one interval (seconds) for every call...
//! # rate = 0.5
//! # ...or one per tag. `default` covers untagged tasks and tags without an
//! # entry; `0` makes a tag unlimited.
//! [rate]
//! default = 0.2
//! compute = 1.0
//! object-store = 0
//! ```
//!
//! # Usage
//!
//! ```rust
//! use cloudtask::util::config::parse_config;
//!
//! let config = parse_config("workers = 2\nrate = 0.5").unwrap();
//! assert_eq!(config.workers, 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::runtime::scheduler::{DispatcherConfig, RateLimits, TaskManager, DEFAULT_MAX_WORKERS};
use crate::util::logger::LogLevel;

/// Key in a per-tag rate table that applies to untagged tasks.
pub const DEFAULT_RATE_KEY: &str = "default";

/// Task manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Manager name, used for thread names and log spans
    #[serde(default = "default_name")]
    pub name: String,
    /// Execution pool size
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Minimum dispatch intervals
    #[serde(default)]
    pub rate: Option<RateSetting>,
    /// Log level for the CLI
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_name() -> String {
    "cloudtask".to_string()
}

fn default_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            workers: DEFAULT_MAX_WORKERS,
            rate: None,
            log_level: LogLevel::default(),
        }
    }
}

impl ManagerConfig {
    /// Rate limits described by this config.
    pub fn rate_limits(&self) -> RateLimits {
        self.rate
            .as_ref()
            .map(RateSetting::to_limits)
            .unwrap_or_default()
    }

    /// Dispatcher configuration described by this config.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_workers: self.workers,
            rate_limits: self.rate_limits(),
        }
    }

    /// Create a (not yet started) task manager from this config.
    pub fn build_manager(&self) -> TaskManager {
        TaskManager::with_config(self.name.as_str(), self.dispatcher_config())
    }
}

/// Rate configuration: one interval, or one per tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateSetting {
    /// Seconds between untagged dispatches
    PerCall(f64),
    /// Seconds between dispatches, per tag
    PerTag(BTreeMap<String, f64>),
}

impl RateSetting {
    /// Convert into [`RateLimits`].
    pub fn to_limits(&self) -> RateLimits {
        match self {
            RateSetting::PerCall(seconds) => RateLimits::per_call(*seconds),
            RateSetting::PerTag(tags) => tags.iter().fold(RateLimits::unlimited(), |limits, (tag, seconds)| {
                if tag == DEFAULT_RATE_KEY {
                    let default = RateLimits::per_call(*seconds).interval_for(None);
                    limits.with_default(Some(default))
                } else {
                    limits.with_tag_secs(tag.as_str(), *seconds)
                }
            }),
        }
    }
}

/// Parse configuration from TOML text
pub fn parse_config(content: &str) -> Result<ManagerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<ManagerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Save configuration as TOML
pub fn save_config(
    config: &ManagerConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}
