//! Live views: change-driven, frame-paced render snapshots of a store.

use crate::core::Result;
use crate::series::frame::FrameScheduler;
use crate::series::mask::TimeMask;
use crate::series::sample::{KeyedSample, MinAndMax, SeriesKey};
use crate::series::store::SharedStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub keys: Vec<SeriesKey>,
    pub series: Arc<[KeyedSample]>,
    pub latest: Option<KeyedSample>,
    pub time_range: Option<MinAndMax>,
    pub time_window: Option<MinAndMax>,
    pub mask: Option<TimeMask>,
}

impl RenderFrame {
    /// Latest value formatted with the frame's mask.
    pub fn latest_label(&self) -> Option<String> {
        let latest = self.latest.as_ref()?;
        let time = self.mask.unwrap_or(TimeMask::TimeOnly).format(latest.time)?;
        Some(format!("{}={} @ {}", latest.key, latest.value, time))
    }
}

/// Receives frames from a running view.
pub trait RenderSink: Send + Sync {
    fn render(&self, frame: RenderFrame);
}

/// Sink that writes a one-line summary per frame to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl RenderSink for LogSink {
    fn render(&self, frame: RenderFrame) {
        info!(
            keys = frame.keys.len(),
            points = frame.series.len(),
            latest = frame.latest_label().as_deref().unwrap_or("-"),
            "frame"
        );
    }
}

/// A set of keys observed in a store.
#[derive(Debug, Clone)]
pub struct LiveView {
    store: SharedStore,
    keys: Vec<SeriesKey>,
    frame_interval: Duration,
}

impl LiveView {
    pub fn new<K: AsRef<str>>(store: SharedStore, keys: &[K], frame_interval: Duration) -> Self {
        Self {
            store,
            keys: keys.iter().map(|key| SeriesKey::from(key.as_ref())).collect(),
            frame_interval,
        }
    }

    pub fn keys(&self) -> &[SeriesKey] {
        &self.keys
    }

    /// Snapshot the store for the current keys.
    pub fn frame(&self) -> RenderFrame {
        let store = self.store.read();
        RenderFrame {
            keys: self.keys.clone(),
            series: store.calculate_simplified_data(&self.keys),
            latest: store.get_latest_data_point(&self.keys),
            time_range: store.get_data_time_min_max(&self.keys),
            time_window: store.time_window(),
            mask: store.get_mask(&self.keys),
        }
    }

    /// Render on the first frame tick after a relevant change. An idle view
    /// does not wake up.
    pub fn spawn(self, sink: Arc<dyn RenderSink>) -> LiveViewHandle {
        let scheduler = Arc::new(FrameScheduler::new());
        let mut changes = self.store.read().subscribe_changes();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let frames = Arc::clone(&scheduler);

        // Initial frame.
        scheduler.schedule();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.frame_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    change = changes.recv() => match change {
                        Ok(event) => {
                            if event.touches(&self.keys) {
                                scheduler.schedule();
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "view lagged behind store changes");
                            scheduler.schedule();
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = scheduler.armed() => {
                        // Pace to the frame tick; requests arriving meanwhile join this frame.
                        ticker.tick().await;
                        if scheduler.take() {
                            sink.render(self.frame());
                        }
                    },
                }
            }
        });

        LiveViewHandle {
            scheduler: frames,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

#[derive(Debug)]
pub struct LiveViewHandle {
    scheduler: Arc<FrameScheduler>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LiveViewHandle {
    /// Redraw requests seen so far, including coalesced ones
    pub fn requested_frames(&self) -> u64 {
        self.scheduler.requested()
    }

    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await?;
        Ok(())
    }
}
