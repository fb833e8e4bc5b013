//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (first of `online.toml`, `/etc/online/online.toml`,
//!   `~/.config/online/online.toml`)
//! - Environment variables (`ONLINE_*`, nested with `__`, e.g.
//!   `ONLINE_TRACKER__WINDOW_SECS=120`), which override the file

use anyhow::{Context, Result};
use online_core::{SliceConfig, DEFAULT_KEY_PREFIX, DEFAULT_WINDOW_SECS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default search paths for the config file.
const CONFIG_PATHS: [&str; 3] = [
    "online.toml",
    "/etc/online/online.toml",
    "~/.config/online/online.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Presence window configuration.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Backing store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Presence window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Seconds of inactivity after which an identifier is offline.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Namespace for bucket keys in the store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Which store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server.
    Redis,
    /// Process-local map; state is lost on restart and not shared.
    Memory,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tracker: TrackerConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_redis_url(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists());

        Self::build(file.as_deref())
    }

    /// Load configuration from a specific file, with environment overrides
    /// on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
        Self::build(Some(&expanded))
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    fn build(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            tracing::info!("Loading config from {}", path.display());
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Toml));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("ONLINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Slicing parameters for the tracker.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is zero.
    pub fn slice_config(&self) -> Result<SliceConfig> {
        Ok(SliceConfig::new(self.tracker.window_secs)
            .context("Invalid tracker.window_secs")?
            .with_key_prefix(self.tracker.key_prefix.clone()))
    }
}
