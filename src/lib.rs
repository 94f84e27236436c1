//! iotpulse - real-time IoT telemetry relay.
//!
//! Devices publish InfluxDB line protocol; iotpulse decodes each buffer,
//! fans the points out to WebSocket subscribers by measurement and tags, and
//! gives consumers a time-series store that keeps live charts cheap to draw.
//!
//! # Features
//!
//! - **Line-protocol decoding**: tolerant single-pass decoder, lazily typed fields
//! - **Subscription fan-out**: per-connection filters, no empty deliveries
//! - **Live time series**: retention window, memoized views, change events
//! - **Curve simplification**: Douglas-Peucker with a point-count target
//! - **Simulated device**: sensor-like data out of the box
//!
//! # Architecture
//!
//! - `protocol`: line-protocol decode/encode and the `Point` model
//! - `broker`: subscription filters, connections, fan-out
//! - `series`: consumer-side store, simplifier, live views
//! - `simulator`: synthetic publisher
//! - `server`: HTTP write endpoint and WebSocket transport
//! - `core`: configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use iotpulse_lib::core::Config;
//! use iotpulse_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let app = Application::new(config)?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod application;
pub mod broker;
pub mod cli;
pub mod core;
pub mod protocol;
pub mod series;
pub mod server;
pub mod simulator;

pub use crate::application::Application;
pub use crate::core::{Config, Result};
