//! Configuration management for the gridpost service.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use gridpost_core::models::DestinationConfig;
use gridpost_delivery::{ClientConfig, EngineConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "gridpost.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `GRIDPOST_` (highest priority)
/// 2. Configuration file (`gridpost.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Destinations can only come from the configuration file; the scalar
/// settings can all be overridden per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding per-destination queue snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log filter, `RUST_LOG` syntax.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// HTTP timeout for delivery requests in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Backoff delay after the first failure, in seconds.
    #[serde(default = "default_backoff_base_delay")]
    pub backoff_base_delay_secs: u64,

    /// Upper bound on the backoff delay, in seconds.
    #[serde(default = "default_backoff_max_delay")]
    pub backoff_max_delay_secs: u64,

    /// Maximum time to wait for workers at shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Configured ingestion destinations.
    #[serde(default)]
    pub destinations: Vec<DestinationEntry>,
}

/// One destination as declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationEntry {
    /// Stable destination identifier.
    pub id: String,

    /// Full URL of the ingestion endpoint.
    pub endpoint_url: String,

    /// API key for the destination. Masked everywhere it is exposed.
    pub api_key: String,

    /// Site identifier sent with every payload.
    pub site_fid: String,

    /// Maximum queued readings before eviction.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum readings delivered per tick.
    #[serde(default = "default_max_sends_per_tick")]
    pub max_sends_per_tick: usize,

    /// Seconds between periodic delivery ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Consecutive failures before a repair issue opens.
    #[serde(default = "default_outage_threshold")]
    pub outage_threshold: u32,
}

impl Config {
    /// Loads configuration from defaults, `gridpost.toml`, and
    /// `GRIDPOST_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("GRIDPOST_"));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            client: ClientConfig {
                timeout: Duration::from_secs(self.delivery_timeout_secs),
                ..ClientConfig::default()
            },
            backoff_base_delay: Duration::from_secs(self.backoff_base_delay_secs),
            backoff_max_delay: Duration::from_secs(self.backoff_max_delay_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Converts the configured destinations to engine destination
    /// configurations.
    pub fn destination_configs(&self) -> Vec<DestinationConfig> {
        self.destinations
            .iter()
            .map(|entry| {
                let mut config = DestinationConfig::new(
                    entry.id.as_str(),
                    entry.endpoint_url.clone(),
                    entry.api_key.clone(),
                    entry.site_fid.clone(),
                );
                config.queue_capacity = entry.queue_capacity;
                config.max_sends_per_tick = entry.max_sends_per_tick;
                config.tick_interval = Duration::from_secs(entry.tick_interval_secs);
                config.outage_threshold = entry.outage_threshold;
                config.http_timeout = Duration::from_secs(self.delivery_timeout_secs);
                config
            })
            .collect()
    }

    /// Validates configuration values.
    fn validate(&self) -> Result<()> {
        if self.delivery_timeout_secs == 0 {
            anyhow::bail!("delivery_timeout_secs must be greater than 0");
        }
        if self.backoff_base_delay_secs == 0 {
            anyhow::bail!("backoff_base_delay_secs must be greater than 0");
        }
        if self.backoff_max_delay_secs < self.backoff_base_delay_secs {
            anyhow::bail!("backoff_max_delay_secs must not be below backoff_base_delay_secs");
        }
        for entry in &self.destinations {
            if entry.tick_interval_secs == 0 {
                anyhow::bail!("destination {}: tick_interval_secs must be greater than 0", entry.id);
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_filter: default_log_filter(),
            delivery_timeout_secs: default_delivery_timeout(),
            backoff_base_delay_secs: default_backoff_base_delay(),
            backoff_max_delay_secs: default_backoff_max_delay(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            destinations: Vec::new(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_filter() -> String {
    "info,gridpost=debug".to_string()
}

fn default_delivery_timeout() -> u64 {
    60
}

fn default_backoff_base_delay() -> u64 {
    60
}

fn default_backoff_max_delay() -> u64 {
    3600
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    500
}

fn default_max_sends_per_tick() -> usize {
    10
}

fn default_tick_interval() -> u64 {
    300
}

fn default_outage_threshold() -> u32 {
    3
}
