//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// How to find and reach the Nyx runtime
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Connection retry settings
    #[serde(default)]
    pub connect: ConnectConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Runtime binary and socket settings
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Runtime executable, either a path or a name looked up in PATH
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Host the runtime debug socket listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// Debug port used when a launch/attach request gives none
    #[serde(default = "default_port")]
    pub default_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            host: default_host(),
            default_port: default_port(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("nyx")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9229
}

/// Connection retry settings
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectConfig {
    /// Total number of connect attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt (1.0 = fixed)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound for the delay between attempts
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    6
}
fn default_retry_delay() -> u64 {
    200
}
fn default_backoff_factor() -> f64 {
    1.0
}
fn default_max_delay() -> u64 {
    2000
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long a forwarded request may wait for its runtime response
    #[serde(default = "default_runtime_request")]
    pub runtime_request_secs: u64,

    /// How often pending requests are checked for expiry
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            runtime_request_secs: default_runtime_request(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_runtime_request() -> u64 {
    10
}
fn default_sweep_interval() -> u64 {
    250
}

impl Timeouts {
    pub fn runtime_request(&self) -> Duration {
        Duration::from_secs(self.runtime_request_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the runtime executable
    ///
    /// Paths containing a separator are used as-is, bare names are searched
    /// in PATH.
    pub fn resolve_runtime(&self) -> Result<PathBuf> {
        let binary = &self.runtime.binary;
        if binary.components().count() > 1 || binary.is_absolute() {
            if binary.exists() {
                return Ok(binary.clone());
            }
            return Err(Error::RuntimeNotFound(binary.display().to_string()));
        }

        which::which(binary).map_err(|_| Error::RuntimeNotFound(binary.display().to_string()))
    }
}
