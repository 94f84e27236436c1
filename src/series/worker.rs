//! Single writer for a shared store.
//!
//! Deliveries, history loads and retention changes arrive as commands on one
//! channel and are applied in order. Readers only ever take the read lock.

use crate::core::{PulseError, Result};
use crate::protocol::Point;
use crate::series::adapter::{HistoricalTable, SampleAdapter};
use crate::series::sample::KeyedSample;
use crate::series::store::{ChangeEvent, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum StoreCommand {
    /// Raw broker delivery (JSON array of points)
    Delivered(String),
    /// Already decoded points
    Points(Vec<Point>),
    /// Historical query result, all value columns
    History(HistoricalTable),
    Samples(Vec<KeyedSample>),
    Clear,
    /// Retention in milliseconds
    SetRetention(f64),
}

#[derive(Debug)]
pub struct StoreWorker {
    store: SharedStore,
    adapter: SampleAdapter,
    retention_tick: Option<Duration>,
}

impl StoreWorker {
    pub fn new(store: SharedStore, adapter: SampleAdapter) -> Self {
        Self {
            store,
            adapter,
            retention_tick: None,
        }
    }

    /// Slide the retention window on this period even without new data.
    pub fn with_retention_tick(mut self, every: Duration) -> Self {
        self.retention_tick = Some(every);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Apply one command synchronously.
    pub fn apply(&self, command: StoreCommand) -> Result<Option<Arc<ChangeEvent>>> {
        let samples = match command {
            StoreCommand::Delivered(json) => self.adapter.samples_from_delivery(&json)?,
            StoreCommand::Points(points) => self.adapter.samples_from_points(&points),
            StoreCommand::History(table) => table.to_samples(None),
            StoreCommand::Samples(samples) => samples,
            StoreCommand::Clear => return Ok(Some(self.store.write().clear())),
            StoreCommand::SetRetention(ms) => {
                return self.store.write().set_retention_time_ms(ms).map(Some);
            },
        };

        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.store.write().update_data(Some(samples))))
    }

    /// Spawn the command loop.
    pub fn start(self, capacity: usize) -> StoreWorkerHandle {
        let (commands, mut receiver) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = self.retention_tick.map(|every| {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker
            });

            info!("store worker started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    command = receiver.recv() => match command {
                        Some(command) => {
                            if let Err(e) = self.apply(command) {
                                warn!(error = %e, category = e.category(), "store command failed");
                            }
                        },
                        None => {
                            debug!("command channel closed");
                            break;
                        },
                    },
                    _ = tick(&mut ticker) => {
                        self.store.write().apply_retention();
                    },
                }
            }
            info!("store worker stopped");
        });

        StoreWorkerHandle {
            commands,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => std::future::pending().await,
    }
}

#[derive(Debug)]
pub struct StoreWorkerHandle {
    commands: mpsc::Sender<StoreCommand>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StoreWorkerHandle {
    pub async fn send(&self, command: StoreCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PulseError::ChannelSend)
    }

    pub fn sender(&self) -> mpsc::Sender<StoreCommand> {
        self.commands.clone()
    }

    /// Stop after the command in flight; queued commands are discarded.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await?;
        Ok(())
    }

    /// Close the command channel and wait until every queued command is applied.
    pub async fn drain(self) -> Result<()> {
        let Self {
            commands,
            shutdown,
            task,
        } = self;
        drop(commands);
        task.await?;
        drop(shutdown);
        Ok(())
    }
}
