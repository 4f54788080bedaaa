//! Relay configuration.
//!
//! Values come from an optional TOML file, then environment overrides:
//! - `FRAMERELAY_BIND`: listen address (default `0.0.0.0:9000`)
//! - `SNAPSHOT_PERIOD_SEC`: default snapshot period in seconds (default 3)
//! - `NVIDIA_VISIBLE_DEVICES`: capability string reported in status envelopes
//!
//! The environment is read once here; sessions only see the resulting snapshot.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use framerelay_protocol::constants::{CAPABILITY_NOT_SET, DEFAULT_SNAPSHOT_PERIOD_SEC};
use framerelay_server::config::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY};
use framerelay_server::{RelayConfig, ServerConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when no CLI argument is given.
const CONFIG_PATH_ENV: &str = "FRAMERELAY_CONFIG";

/// Relay process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Default snapshot period for sessions that do not request one.
    #[serde(default = "default_snapshot_period")]
    pub snapshot_period_sec: u32,

    /// Reported as `gpu_visible` in status envelopes.
    #[serde(default = "default_gpu_visible")]
    pub gpu_visible: String,

    /// Per-connection outbound queue bound.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// How long a closing connection may spend flushing queued envelopes.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_bind() -> SocketAddr {
    ServerConfig::default().bind
}

fn default_snapshot_period() -> u32 {
    DEFAULT_SNAPSHOT_PERIOD_SEC
}

fn default_gpu_visible() -> String {
    CAPABILITY_NOT_SET.into()
}

fn default_outbound_capacity() -> usize {
    DEFAULT_OUTBOUND_CAPACITY
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            snapshot_period_sec: default_snapshot_period(),
            gpu_visible: default_gpu_visible(),
            outbound_capacity: default_outbound_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Config {
    /// Loads the config file (if any), then applies environment overrides.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file read");
        Ok(config)
    }

    /// Applies environment overrides through `lookup`.
    fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("FRAMERELAY_BIND") {
            self.bind = bind
                .parse()
                .with_context(|| format!("invalid FRAMERELAY_BIND: {bind}"))?;
        }
        if let Some(period) = lookup("SNAPSHOT_PERIOD_SEC") {
            self.snapshot_period_sec = period
                .trim()
                .parse()
                .with_context(|| format!("invalid SNAPSHOT_PERIOD_SEC: {period}"))?;
        }
        if let Some(devices) = lookup("NVIDIA_VISIBLE_DEVICES") {
            self.gpu_visible = devices;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.snapshot_period_sec == 0 {
            anyhow::bail!("snapshot period must be a positive number of seconds");
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig { bind: self.bind }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            default_snapshot_period_sec: self.snapshot_period_sec,
            capability: self.gpu_visible.clone(),
            outbound_capacity: self.outbound_capacity,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            ..RelayConfig::default()
        }
    }
}

/// Config file path from the first CLI argument or `FRAMERELAY_CONFIG`.
pub fn config_path_from_args() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}
