//! Command-line interface for iotpulse.
//!
//! Just run `iotpulse` to start the relay with a simulated device publishing
//! into it.

use crate::application::{Application, WatchOptions};
use crate::broker::SubscriptionFilter;
use crate::core::{Config, ConfigBuilder, PulseError, Result};
use clap::Parser;
use humantime_serde::re::humantime;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time IoT telemetry relay.
#[derive(Parser, Debug)]
#[command(name = "iotpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// HTTP/WebSocket port
    #[arg(short, long, env = "IOTPULSE_PORT")]
    pub port: Option<u16>,

    /// Configuration file path (default: ~/.config/iotpulse/config.yaml)
    #[arg(short, long, env = "IOTPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not start the simulated device
    #[arg(long, env = "IOTPULSE_NO_SIMULATOR")]
    pub no_simulator: bool,

    /// Retention window of the watch view, e.g. `30s` or `5m`
    #[arg(long, env = "IOTPULSE_RETENTION", value_parser = humantime::parse_duration)]
    pub retention: Option<Duration>,

    /// Subscribe an in-process view, `measurement[,key=value...]` (repeatable)
    #[arg(short, long = "watch")]
    pub watch: Vec<SubscriptionFilter>,

    /// Series keys rendered by the watch view (default: simulator measurements)
    #[arg(long, value_delimiter = ',')]
    pub keys: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, env = "IOTPULSE_DEBUG")]
    pub debug: bool,

    /// Log with targets, thread ids and line numbers
    #[arg(long, env = "IOTPULSE_HEADLESS")]
    pub headless: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join("iotpulse").join("config.yaml"))
                .filter(|path| path.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                    tracing::info!("Loaded configuration from: {:?}", path);
                },
                Err(e) if self.config.is_some() => {
                    return Err(PulseError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
                Err(_) => {
                    tracing::debug!("No config file found at {:?}, using defaults", path);
                },
            }
        }

        self.apply_overrides(builder)
    }

    fn apply_overrides(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(retention) = self.retention {
            builder = builder.retention(Some(retention));
        }
        if self.no_simulator {
            builder = builder.simulator(false);
        }
        builder.debug(self.debug).build()
    }

    /// Watch options, if any filter was given.
    pub fn watch_options(&self, config: &Config) -> Option<WatchOptions> {
        if self.watch.is_empty() {
            return None;
        }
        let keys = if self.keys.is_empty() {
            config.simulator.settings.measurements.keys().cloned().collect()
        } else {
            self.keys.clone()
        };
        Some(WatchOptions {
            filters: self.watch.clone(),
            keys,
        })
    }

    /// Initialize logging from the loaded configuration.
    ///
    /// `RUST_LOG` overrides everything; otherwise see [`log_level`].
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("IOTPULSE_LOG_LEVEL").ok();
        let level = log_level(config, env_log_level.as_deref());

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let fmt_layer = if self.headless || config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| PulseError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Log filter directive: debug mode, then `IOTPULSE_LOG_LEVEL`, then `logging.level`.
pub fn log_level<'a>(config: &'a Config, env_log_level: Option<&'a str>) -> &'a str {
    if config.debug {
        "debug"
    } else {
        env_log_level.unwrap_or_else(|| config.logging.level.as_str())
    }
}

/// Execute the iotpulse application.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        config.validate()?;
        println!("Configuration is valid!");
        println!("  Listen: {}:{}", config.server.bind_address, config.server.port);
        println!("  Channel capacity: {}", config.broker.channel_capacity);
        println!("  Max connections: {}", config.broker.max_connections);
        println!(
            "  Retention: {}",
            config
                .store
                .retention
                .map_or_else(|| "unbounded".to_string(), |d| humantime::format_duration(d).to_string())
        );
        println!("  Simulator: {}", if config.simulator.enabled { "on" } else { "off" });
        return Ok(());
    }

    let watch = cli.watch_options(&config);
    let mut app = Application::new(config)?;
    if let Some(watch) = watch {
        app = app.with_watch(watch);
    }
    app.run().await
}
