//! Configuration loading.
//!
//! Settings come from an optional TOML file layered with `LIVEDASH_*`
//! environment variables; every field has a default so the binary runs
//! without any file at all. Nested sections map to env vars with a
//! double underscore, e.g. `LIVEDASH_STATS_SERVER__HOST`.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Upstream statistics server (newline protocol over TCP).
#[derive(Debug, Clone, Deserialize)]
pub struct StatsServerSettings {
    #[serde(default = "default_stats_host")]
    pub host: String,
    #[serde(default = "default_stats_port")]
    pub port: u16,
    /// Seconds to wait before a reconnect attempt.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for StatsServerSettings {
    fn default() -> Self {
        Self {
            host: default_stats_host(),
            port: default_stats_port(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

/// The statistics server's own HTTP side, proxied for discovery and
/// historical data.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsHttpSettings {
    #[serde(default = "default_stats_http_base")]
    pub base_url: String,
}

impl Default for StatsHttpSettings {
    fn default() -> Self {
        Self {
            base_url: default_stats_http_base(),
        }
    }
}

/// The relay's own HTTP listener.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Command subscribed on behalf of dashboard clients.
    #[serde(default = "default_aggregate_command")]
    pub aggregate_command: String,
    /// Optional JSON file of per-channel title and logo overrides.
    #[serde(default)]
    pub overrides_path: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            aggregate_command: default_aggregate_command(),
            overrides_path: None,
        }
    }
}

/// Chart windowing and annotation tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartSettings {
    #[serde(default = "default_window_limit")]
    pub window_limit: usize,
    #[serde(default = "default_peak_interval_secs")]
    pub peak_interval_secs: i64,
    /// Platform breakdown keys, in stacking and tie-break order.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            window_limit: default_window_limit(),
            peak_interval_secs: default_peak_interval_secs(),
            platforms: default_platforms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub stats_server: StatsServerSettings,
    #[serde(default)]
    pub stats_http: StatsHttpSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub chart: ChartSettings,
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix("LIVEDASH").separator("__"))
            .build()
            .context("failed to load configuration")?;

        config
            .try_deserialize()
            .context("invalid configuration values")
    }
}

fn default_stats_host() -> String {
    "localhost".to_string()
}

fn default_stats_port() -> u16 {
    7777
}

fn default_reconnect_delay_secs() -> u64 {
    30
}

fn default_stats_http_base() -> String {
    "http://localhost:8000".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_aggregate_command() -> String {
    "overview".to_string()
}

fn default_window_limit() -> usize {
    crate::data::DEFAULT_WINDOW_LIMIT
}

fn default_peak_interval_secs() -> i64 {
    crate::data::DEFAULT_PEAK_INTERVAL_SECS
}

fn default_platforms() -> Vec<String> {
    vec!["desktop".to_string(), "mobile".to_string()]
}
