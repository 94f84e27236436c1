//! Synthetic sensor publisher.
//!
//! Emits one `environment` point per interval with a value per configured
//! measurement. Values follow a slow periodic wave plus a daily wave that
//! bottoms out at noon, with up to 1.0 of uniform jitter.

use crate::core::{PulseError, Result};
use crate::protocol::{encode, Point};
use crate::series::clock::{Clock, SystemClock};
use crate::series::mask::DAY_MILLIS;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Value range and period of one simulated measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRange {
    /// Period of the main wave in days
    pub period: f64,
    pub min: f64,
    pub max: f64,
}

impl MeasurementRange {
    pub const fn new(period: f64, min: f64, max: f64) -> Self {
        Self { period, min, max }
    }
}

/// Publisher settings, exchanged as JSON over the settings routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulatorSettings {
    pub running: bool,
    /// Milliseconds between points
    #[serde(alias = "send_interval")]
    pub send_interval: u64,
    pub measurement: String,
    #[serde(alias = "client_id")]
    pub client_id: String,
    pub measurements: BTreeMap<String, MeasurementRange>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        let measurements = [
            ("Temperature", MeasurementRange::new(30.0, 0.0, 40.0)),
            ("Humidity", MeasurementRange::new(90.0, 0.0, 99.0)),
            ("Pressure", MeasurementRange::new(20.0, 970.0, 1050.0)),
            ("CO2", MeasurementRange::new(1.0, 400.0, 3000.0)),
            ("TVOC", MeasurementRange::new(1.0, 250.0, 2000.0)),
        ]
        .into_iter()
        .map(|(name, range)| (name.to_string(), range))
        .collect();

        Self {
            running: true,
            send_interval: 100,
            measurement: "environment".to_string(),
            client_id: "virtual_device".to_string(),
            measurements,
        }
    }
}

impl SimulatorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.send_interval == 0 {
            return Err(PulseError::config("simulator sendInterval must be greater than 0"));
        }
        if self.measurement.is_empty() {
            return Err(PulseError::config("simulator measurement must not be empty"));
        }
        for (name, range) in &self.measurements {
            if !(range.period.is_finite() && range.period > 0.0) {
                return Err(PulseError::config(format!(
                    "simulator measurement {name}: period must be positive"
                )));
            }
            if !(range.min.is_finite() && range.max.is_finite()) || range.min > range.max {
                return Err(PulseError::config(format!(
                    "simulator measurement {name}: min must not exceed max"
                )));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.send_interval.max(1))
    }
}

/// Simulated value at `time_ms`, truncated to one decimal.
pub fn generate_value(range: &MeasurementRange, time_ms: f64, jitter: f64) -> f64 {
    let dif = range.max - range.min;
    let period_value = dif / 4.0 * (((time_ms / DAY_MILLIS) % range.period) / range.period * 2.0 * PI).sin();
    let day_value = dif / 4.0 * ((time_ms % DAY_MILLIS) / DAY_MILLIS * 2.0 * PI - PI / 2.0).sin();
    ((range.min + dif / 2.0 + period_value + day_value + jitter) * 10.0).trunc() / 10.0
}

/// Publisher with runtime-updatable settings.
#[derive(Debug)]
pub struct Simulator {
    settings: watch::Sender<SimulatorSettings>,
    defaults: SimulatorSettings,
    clock: Arc<dyn Clock>,
}

impl Simulator {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: SimulatorSettings, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = watch::channel(settings.clone());
        Self {
            settings: sender,
            defaults: settings,
            clock,
        }
    }

    pub fn settings(&self) -> SimulatorSettings {
        self.settings.borrow().clone()
    }

    /// Settings the simulator was created with
    pub fn defaults(&self) -> &SimulatorSettings {
        &self.defaults
    }

    /// Validate and apply new settings; a running loop picks them up at once.
    pub fn update_settings(&self, settings: SimulatorSettings) -> Result<()> {
        settings.validate()?;
        debug!(running = settings.running, interval_ms = settings.send_interval, "simulator settings updated");
        self.settings.send_replace(settings);
        Ok(())
    }

    /// Build the point for `time_ms`.
    pub fn sample_point(settings: &SimulatorSettings, time_ms: f64) -> Point {
        let mut point = Point::new(settings.measurement.as_str())
            .with_tag("clientId", settings.client_id.as_str())
            .with_timestamp(format!("{}", time_ms as i64));
        for (name, range) in &settings.measurements {
            let value = generate_value(range, time_ms, rand::random::<f64>());
            point.insert_field(name.clone(), value.to_string().into());
        }
        point
    }

    /// Line-protocol buffer for one tick, `None` while paused.
    pub fn next_buffer(&self) -> Option<Bytes> {
        let settings = self.settings.borrow();
        if !settings.running || settings.measurements.is_empty() {
            return None;
        }
        let point = Self::sample_point(&settings, self.clock.now_ms());
        Some(Bytes::from(encode(std::iter::once(&point))))
    }

    /// Publish into `feed` until stopped or the feed closes.
    pub fn start(self: &Arc<Self>, feed: mpsc::Sender<Bytes>) -> SimulatorHandle {
        let simulator = Arc::clone(self);
        let mut changes = self.settings.subscribe();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("simulator started");
            loop {
                if let Some(buffer) = simulator.next_buffer() {
                    if feed.send(buffer).await.is_err() {
                        debug!("feed closed, simulator exiting");
                        break;
                    }
                }

                let interval = simulator.settings.borrow().interval();
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(interval) => {},
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    },
                }
            }
            info!("simulator stopped");
        });

        SimulatorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

#[derive(Debug)]
pub struct SimulatorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::series::clock::ManualClock;

    #[test]
    fn test_generate_value_within_range() {
        let range = MeasurementRange::new(30.0, 0.0, 40.0);
        for hour in 0..48 {
            let time = hour as f64 * 3_600_000.0;
            let value = generate_value(&range, time, 0.5);
            assert!((0.0..=41.0).contains(&value), "value {value} at hour {hour}");
            assert_eq!(value, (value * 10.0).trunc() / 10.0);
        }
    }

    #[test]
    fn test_generate_value_at_epoch() {
        // period phase 0, day phase -pi/2: min + dif/2 - dif/4
        let range = MeasurementRange::new(1.0, 0.0, 40.0);
        assert_eq!(generate_value(&range, 0.0, 0.0), 10.0);
    }

    #[test]
    fn test_validate_settings() {
        assert!(SimulatorSettings::default().validate().is_ok());

        let mut settings = SimulatorSettings::default();
        settings.send_interval = 0;
        assert!(settings.validate().is_err());

        let mut settings = SimulatorSettings::default();
        settings
            .measurements
            .insert("Bad".into(), MeasurementRange::new(1.0, 10.0, 0.0));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_json_shape() {
        let json = r#"{"running":false,"sendInterval":250,"measurements":{"Temperature":{"period":30,"min":0,"max":40}}}"#;
        let settings: SimulatorSettings = serde_json::from_str(json).unwrap();
        assert!(!settings.running);
        assert_eq!(settings.send_interval, 250);
        assert_eq!(settings.measurement, "environment");
        assert_eq!(settings.measurements.len(), 1);
    }

    #[test]
    fn test_buffer_decodes_to_one_point() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000.0));
        let simulator = Simulator::with_clock(SimulatorSettings::default(), clock);
        let buffer = simulator.next_buffer().unwrap();

        let points = decode(&buffer);
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement, "environment");
        assert_eq!(point.tag("clientId"), Some("virtual_device"));
        assert_eq!(point.fields.len(), 5);
        assert_eq!(point.timestamp.as_deref(), Some("1700000000000"));
        assert!(point.field("Temperature").and_then(|v| v.as_f64()).is_some());
    }

    #[test]
    fn test_paused_emits_nothing() {
        let simulator = Simulator::new(SimulatorSettings::default());
        let mut paused = simulator.settings();
        paused.running = false;
        simulator.update_settings(paused).unwrap();
        assert!(simulator.next_buffer().is_none());
        assert!(simulator.defaults().running);
    }

    #[tokio::test]
    async fn test_start_publishes_until_stopped() {
        let mut settings = SimulatorSettings::default();
        settings.send_interval = 5;
        let simulator = Arc::new(Simulator::new(settings));
        let (feed, mut received) = mpsc::channel(16);

        let handle = simulator.start(feed);
        let first = tokio::time::timeout(Duration::from_secs(1), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode(&first).len(), 1);

        handle.stop().await.unwrap();
    }
}
