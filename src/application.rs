//! Main application: wires configuration into running components.

use crate::broker::{Broker, BrokerHandle, ConnectionId, SubscriptionFilter};
use crate::core::{Config, Result, StoreConfig};
use crate::series::{
    Clock, LiveView, LiveViewHandle, LogSink, SampleAdapter, StoreCommand, StoreWorker,
    StoreWorkerHandle, SystemClock, TimeSeriesStore,
};
use crate::server::{self, AppState};
use crate::simulator::Simulator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);
const WORKER_CAPACITY: usize = 256;

/// In-process consumer: subscribes to the broker and renders to the log.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub filters: Vec<SubscriptionFilter>,
    /// Series keys rendered by the view
    pub keys: Vec<String>,
}

/// Main application struct that coordinates all components.
pub struct Application {
    config: Config,
    broker: Arc<Broker>,
    simulator: Option<Arc<Simulator>>,
    watch: Option<WatchOptions>,
}

impl Application {
    /// Create a new Application with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let broker = Arc::new(Broker::new(config.broker.clone()));
        let simulator = config
            .simulator
            .enabled
            .then(|| Arc::new(Simulator::new(config.simulator.settings.clone())));

        Ok(Self {
            config,
            broker,
            simulator,
            watch: None,
        })
    }

    pub fn with_watch(mut self, watch: WatchOptions) -> Self {
        self.watch = Some(watch);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn simulator(&self) -> Option<&Arc<Simulator>> {
        self.simulator.as_ref()
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", e);
            }
            info!("received shutdown signal, stopping...");
        })
        .await
    }

    /// Run until `shutdown` resolves, then stop every component.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("starting iotpulse");

        // Fallible setup before any task is spawned.
        let watcher = match &self.watch {
            Some(options) => Some(Watcher::start(&self.broker, &self.config.store, options)?),
            None => None,
        };

        let (feed, feed_rx) = self.broker.feed_channel();
        let broker_handle = self.broker.start(feed_rx);
        let maintenance = self.broker.spawn_maintenance(MAINTENANCE_INTERVAL);

        let simulator_handle = self.simulator.as_ref().map(|simulator| {
            info!(
                interval_ms = simulator.settings().send_interval,
                "simulator publishing"
            );
            simulator.start(feed.clone())
        });

        let state = AppState {
            broker: Arc::clone(&self.broker),
            feed,
            simulator: self.simulator.clone(),
        };
        let served = server::serve(&self.config.server, state, shutdown).await;

        if let Some(handle) = simulator_handle {
            if let Err(e) = handle.stop().await {
                error!("simulator shutdown failed: {}", e);
            }
        }
        if let Some(watcher) = watcher {
            watcher.stop(&self.broker).await;
        }
        maintenance.abort();
        stop_broker(broker_handle).await;

        served
    }
}

async fn stop_broker(handle: BrokerHandle) {
    if let Err(e) = handle.stop().await {
        error!("broker shutdown failed: {}", e);
    }
}

struct Watcher {
    connection: ConnectionId,
    forward: JoinHandle<()>,
    worker: StoreWorkerHandle,
    view: LiveViewHandle,
}

impl Watcher {
    fn start(broker: &Arc<Broker>, config: &StoreConfig, options: &WatchOptions) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = TimeSeriesStore::from_config(config, Arc::clone(&clock))?.into_shared();
        let adapter = SampleAdapter::new(config.timestamp_unit, config.key_scope, clock);

        let (connection, mut deliveries) = broker.connect()?;
        if let Err(e) = broker.set_subscription(connection, options.filters.clone()) {
            broker.disconnect(connection);
            return Err(e);
        }

        let mut worker = StoreWorker::new(Arc::clone(&store), adapter);
        if config.retention.is_some() {
            worker = worker.with_retention_tick(Duration::from_millis(config.time_window_raster_ms));
        }
        let worker = worker.start(WORKER_CAPACITY);

        let commands = worker.sender();
        let forward = tokio::spawn(async move {
            while let Some(message) = deliveries.recv().await {
                if commands.send(StoreCommand::Delivered(message)).await.is_err() {
                    break;
                }
            }
        });

        let view = LiveView::new(store, &options.keys, config.frame_interval).spawn(Arc::new(LogSink));
        info!(
            connection,
            filters = options.filters.len(),
            keys = options.keys.len(),
            "watching"
        );

        Ok(Self {
            connection,
            forward,
            worker,
            view,
        })
    }

    async fn stop(self, broker: &Broker) {
        broker.disconnect(self.connection);
        if let Err(e) = self.forward.await {
            error!("watch forwarder failed: {}", e);
        }
        if let Err(e) = self.worker.drain().await {
            error!("store worker shutdown failed: {}", e);
        }
        if let Err(e) = self.view.stop().await {
            error!("view shutdown failed: {}", e);
        }
    }
}
