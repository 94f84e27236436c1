//! Core error and configuration types shared by every iotpulse module.

pub mod config;
pub mod error;

pub use config::{
    BrokerConfig, Config, ConfigBuilder, LogLevel, LoggingConfig, ServerConfig, SimulatorConfig,
    StoreConfig,
};
pub use error::{PulseError, Result};
