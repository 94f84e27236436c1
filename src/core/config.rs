//! Configuration management for iotpulse.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument and environment overrides (see `cli`)
//! - Validation and defaults

use crate::core::{PulseError, Result};
use crate::series::{DuplicatePolicy, KeyScope, TimestampUnit};
use crate::simulator::SimulatorSettings;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Complete configuration for iotpulse
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP / WebSocket transport
    pub server: ServerConfig,
    /// Subscription broker
    pub broker: BrokerConfig,
    /// Consumer-side time-series store
    pub store: StoreConfig,
    /// Synthetic data publisher
    pub simulator: SimulatorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener
    pub bind_address: IpAddr,
    /// Port serving `/mqtt` and `/api/v2/write`
    pub port: u16,
    /// Permissive CORS headers
    pub enable_cors: bool,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-connection delivery queue length
    pub channel_capacity: usize,
    /// Maximum number of live connections
    pub max_connections: usize,
    /// Connection count above which matching runs on the rayon pool
    pub parallel_fanout_threshold: usize,
    /// Buffers queued between the upstream feed and the ingest loop
    pub feed_capacity: usize,
}

/// Time-series store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Sliding retention window, `None` keeps everything
    #[serde(with = "humantime_serde")]
    pub retention: Option<Duration>,
    /// Upper bound of points handed to a renderer per key
    pub max_points: usize,
    /// Below this the simplifier falls back to stride sampling
    pub min_points: usize,
    /// What happens to samples sharing a timestamp
    pub duplicate_policy: DuplicatePolicy,
    /// Unit of timestamps delivered by the broker
    pub timestamp_unit: TimestampUnit,
    /// How sample keys are derived from points
    pub key_scope: KeyScope,
    /// Raster applied to the retention window edges (ms)
    pub time_window_raster_ms: u64,
    /// Render frame interval for coalesced redraws
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
}

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Start the synthetic publisher with the application
    pub enabled: bool,
    /// Initial publisher settings
    pub settings: SimulatorSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Verbose format with targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 5000,
            enable_cors: true,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            channel_capacity: 256,
            max_connections: 1000,
            parallel_fanout_threshold: 64,
            feed_capacity: 1024,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            retention: None,
            max_points: 1000,
            min_points: 200,
            duplicate_policy: DuplicatePolicy::Append,
            timestamp_unit: TimestampUnit::MillisDigits,
            key_scope: KeyScope::Field,
            time_window_raster_ms: 100,
            frame_interval: Duration::from_millis(16),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            enabled: true,
            settings: SimulatorSettings::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(PulseError::config("server port must be greater than 0"));
        }

        if self.broker.channel_capacity == 0 {
            return Err(PulseError::config("channel_capacity must be greater than 0"));
        }

        if self.broker.max_connections == 0 {
            return Err(PulseError::config("max_connections must be greater than 0"));
        }

        if self.broker.feed_capacity == 0 {
            return Err(PulseError::config("feed_capacity must be greater than 0"));
        }

        if self.store.max_points < 2 {
            return Err(PulseError::config(format!(
                "max_points must be at least 2, got {}",
                self.store.max_points
            )));
        }

        if self.store.min_points > self.store.max_points {
            return Err(PulseError::config(format!(
                "min_points ({}) must not exceed max_points ({})",
                self.store.min_points, self.store.max_points
            )));
        }

        if self.store.time_window_raster_ms == 0 {
            return Err(PulseError::config("time_window_raster_ms must be greater than 0"));
        }

        if self.store.frame_interval.is_zero() {
            return Err(PulseError::config("frame_interval must be greater than 0"));
        }

        self.simulator.settings.validate()?;

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| PulseError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set listener port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set bind address
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.server.bind_address = address;
        self
    }

    /// Set per-connection queue length
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.broker.channel_capacity = capacity;
        self
    }

    /// Set the connection limit
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.broker.max_connections = max;
        self
    }

    /// Set store retention, `None` disables trimming
    pub fn retention(mut self, retention: Option<Duration>) -> Self {
        self.config.store.retention = retention;
        self
    }

    /// Set simplification bounds
    pub fn points(mut self, max_points: usize, min_points: usize) -> Self {
        self.config.store.max_points = max_points;
        self.config.store.min_points = min_points;
        self
    }

    /// Set duplicate timestamp handling
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.store.duplicate_policy = policy;
        self
    }

    /// Enable or disable the synthetic publisher
    pub fn simulator(mut self, enabled: bool) -> Self {
        self.config.simulator.enabled = enabled;
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
