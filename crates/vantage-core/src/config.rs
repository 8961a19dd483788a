//! Configuration system for Vantage.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $VANTAGE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/vantage/config.toml
//!   3. ~/.config/vantage/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VantageConfig {
    pub node: NodeConfig,
    pub dispatcher: DispatcherConfig,
    pub invoker: InvokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local calculation nodes to start. 0 = available parallelism.
    pub node_count: u32,
    /// Middle component of generated node ids. Empty = $VANTAGE_NODE_ID or "0".
    pub node_id: String,
    /// Suppress a function on a target for the rest of the run once it raises there.
    pub blacklist_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How long a dispatch waits for any invoker to accept a job.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    pub tail_policy: TailPolicy,
}

/// When tail jobs run after their parent on the same node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Only when every parent item succeeded.
    #[default]
    AllSucceeded,
    /// Unless a parent item's function raised an error.
    NoExceptions,
}

impl FromStr for TailPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_succeeded" => Ok(TailPolicy::AllSucceeded),
            "no_exceptions" => Ok(TailPolicy::NoExceptions),
            other => Err(ConfigError::InvalidValue("tail_policy", other.to_string())),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_count: 0,
            node_id: String::new(),
            blacklist_failures: false,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl NodeConfig {
    /// Resolved node count.
    pub fn effective_node_count(&self) -> usize {
        if self.node_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.node_count as usize
        }
    }
}

impl DispatcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("vantage")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl VantageConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            VantageConfig::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("VANTAGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&VantageConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply VANTAGE_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("VANTAGE_NODE__NODE_COUNT") {
            self.node.node_count = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("node.node_count", v.clone()))?;
        }
        if let Ok(v) = std::env::var("VANTAGE_NODE__BLACKLIST_FAILURES") {
            self.node.blacklist_failures = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("node.blacklist_failures", v.clone()))?;
        }
        if let Ok(v) = std::env::var("VANTAGE_DISPATCHER__TIMEOUT_MS") {
            self.dispatcher.timeout_ms = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("dispatcher.timeout_ms", v.clone()))?;
        }
        if let Ok(v) = std::env::var("VANTAGE_INVOKER__TAIL_POLICY") {
            self.invoker.tail_policy = v.parse()?;
        }
        Ok(())
    }
}
