//! Delivery engine: lifecycle manager for all configured destinations.
//!
//! Owns the explicit map from destination id to running worker — no
//! module-level registry. `start_destination` reloads persisted state
//! (fatal on store failure), seeds the status aggregator, and spawns the
//! worker; `stop_destination` flushes and preserves state; teardown via
//! `remove_destination` additionally discards the snapshot and closes any
//! open issue. Producers hand readings to `enqueue`; the host's trigger
//! surface maps onto `send_now` and `get_status`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use gridpost_core::{
    events::{NotificationSink, TriggerReason},
    mask::mask_secret,
    models::{DestinationConfig, DestinationId, Reading, StatusSnapshot},
    time::Clock,
};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    backoff::BackoffPolicy,
    client::{ClientConfig, TransmissionClient},
    error::{DeliveryError, Result},
    queue::DurableQueue,
    repair::{IssueSink, RepairManager},
    scheduler::DestinationWorker,
    status::StatusAggregator,
    store::StateStore,
};

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP client configuration shared by all destinations.
    pub client: ClientConfig,

    /// Backoff delay after the first failure.
    pub backoff_base_delay: Duration,

    /// Upper bound on the backoff delay.
    pub backoff_max_delay: Duration,

    /// Maximum time to wait for a worker to finish at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            backoff_base_delay: Duration::from_secs(60),
            backoff_max_delay: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Running state of one destination.
struct DestinationHandle {
    config: DestinationConfig,
    queue: Arc<Mutex<DurableQueue>>,
    running: Arc<AtomicBool>,
    trigger_tx: mpsc::Sender<TriggerReason>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Coordinates delivery workers across all configured destinations.
pub struct DeliveryEngine {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    client: Arc<TransmissionClient>,
    sink: Arc<dyn NotificationSink>,
    repair: Arc<RepairManager>,
    status: Arc<StatusAggregator>,
    clock: Arc<dyn Clock>,
    destinations: RwLock<HashMap<DestinationId, DestinationHandle>>,
}

impl DeliveryEngine {
    /// Creates a new engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
        issue_sink: Arc<dyn IssueSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(TransmissionClient::new(&config.client)?);
        let repair = Arc::new(RepairManager::new(issue_sink));
        let status = Arc::new(StatusAggregator::new(sink.clone()));

        Ok(Self {
            config,
            store,
            client,
            sink,
            repair,
            status,
            clock,
            destinations: RwLock::new(HashMap::new()),
        })
    }

    /// Starts a destination worker, reloading any persisted state.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, a duplicate destination id, or a
    /// store load failure — a destination must never silently start with
    /// an empty queue when its snapshot cannot be read.
    pub async fn start_destination(&self, config: DestinationConfig) -> Result<()> {
        config.validate()?;

        let mut destinations = self.destinations.write().await;
        if destinations.contains_key(&config.id) {
            return Err(DeliveryError::destination_exists(config.id.as_str()));
        }

        let queue =
            DurableQueue::open(config.id.clone(), config.queue_capacity, self.store.clone())?;
        let outage = queue.outage().clone();
        let queue_len = queue.len();
        let evicted_total = queue.evicted_total();

        self.status.seed(config.id.clone(), &outage, queue_len, evicted_total).await;

        let queue = Arc::new(Mutex::new(queue));
        let running = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let policy = BackoffPolicy {
            base_delay: self.config.backoff_base_delay,
            max_delay: self.config.backoff_max_delay,
            sustained_threshold: config.outage_threshold,
        };

        let worker = DestinationWorker::new(
            config.clone(),
            queue.clone(),
            outage,
            self.client.clone(),
            policy,
            self.repair.clone(),
            self.status.clone(),
            self.sink.clone(),
            self.clock.clone(),
            running.clone(),
            cancel.clone(),
        );
        let join = tokio::spawn(worker.run(trigger_rx));

        info!(
            destination = %config.id,
            queue_len,
            queue_capacity = config.queue_capacity,
            "destination started"
        );

        destinations.insert(
            config.id.clone(),
            DestinationHandle { config, queue, running, trigger_tx, cancel, join },
        );

        Ok(())
    }

    /// Stops a destination worker, preserving its persisted state.
    ///
    /// An in-flight attempt is allowed to finish within the shutdown
    /// timeout; afterwards the worker is aborted. Either way the queue
    /// snapshot on disk stays consistent, since every mutation persists.
    pub async fn stop_destination(&self, destination: &DestinationId) -> Result<()> {
        let handle = self
            .destinations
            .write()
            .await
            .remove(destination)
            .ok_or_else(|| DeliveryError::unknown_destination(destination.as_str()))?;

        handle.cancel.cancel();
        let mut join = handle.join;
        if tokio::time::timeout(self.config.shutdown_timeout, &mut join).await.is_err() {
            warn!(destination = %destination, "worker did not stop in time, aborting");
            join.abort();
        }

        // worker may have been aborted before its final flush
        handle.queue.lock().await.persist();

        info!(destination = %destination, "destination stopped");
        Ok(())
    }

    /// Tears a destination down: stops it, discards its persisted state,
    /// and closes any open issue.
    pub async fn remove_destination(&self, destination: &DestinationId) -> Result<()> {
        self.stop_destination(destination).await?;
        self.store.remove(destination)?;
        self.repair.clear(destination).await;
        self.status.remove(destination).await;

        info!(destination = %destination, "destination removed");
        Ok(())
    }

    /// Enqueues a reading for delivery (producer interface).
    ///
    /// Returns the evicted reading when the queue was at capacity.
    pub async fn enqueue(&self, reading: Reading) -> Result<Option<Reading>> {
        let destinations = self.destinations.read().await;
        let handle = destinations
            .get(&reading.destination)
            .ok_or_else(|| DeliveryError::unknown_destination(reading.destination.as_str()))?;

        let evicted = handle.queue.lock().await.enqueue(reading);
        Ok(evicted)
    }

    /// Triggers an immediate delivery attempt (trigger interface).
    ///
    /// With no destination id, all destinations are triggered. A trigger
    /// for a destination that is currently running a batch is a no-op:
    /// the in-flight attempt is never interrupted and no record can be
    /// delivered twice concurrently.
    pub async fn send_now(&self, destination: Option<&DestinationId>) -> Result<()> {
        let destinations = self.destinations.read().await;

        match destination {
            Some(id) => {
                let handle = destinations
                    .get(id)
                    .ok_or_else(|| DeliveryError::unknown_destination(id.as_str()))?;
                Self::trigger(handle);
            },
            None => {
                for handle in destinations.values() {
                    Self::trigger(handle);
                }
            },
        }
        Ok(())
    }

    fn trigger(handle: &DestinationHandle) {
        if handle.running.load(Ordering::SeqCst) {
            debug!(destination = %handle.config.id, "delivery already running, trigger ignored");
            return;
        }
        if handle.trigger_tx.try_send(TriggerReason::Manual).is_err() {
            debug!(destination = %handle.config.id, "trigger already pending, coalesced");
        }
    }

    /// Returns status snapshots (trigger interface).
    ///
    /// With no destination id, snapshots for every running destination
    /// are returned. Explicit queries re-emit the `status` notification.
    pub async fn get_status(
        &self,
        destination: Option<&DestinationId>,
    ) -> Result<Vec<StatusSnapshot>> {
        match destination {
            Some(id) => {
                if !self.destinations.read().await.contains_key(id) {
                    return Err(DeliveryError::unknown_destination(id.as_str()));
                }
                Ok(self.status.report(id).await.into_iter().collect())
            },
            None => {
                let ids: Vec<DestinationId> =
                    self.destinations.read().await.keys().cloned().collect();
                let mut snapshots = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(snapshot) = self.status.report(&id).await {
                        snapshots.push(snapshot);
                    }
                }
                snapshots.sort_by(|a, b| a.destination.cmp(&b.destination));
                Ok(snapshots)
            },
        }
    }

    /// Returns the diagnostics view for a destination: masked
    /// configuration, current status, and the last masked payload.
    pub async fn diagnostics(&self, destination: &DestinationId) -> Result<serde_json::Value> {
        let destinations = self.destinations.read().await;
        let handle = destinations
            .get(destination)
            .ok_or_else(|| DeliveryError::unknown_destination(destination.as_str()))?;

        let config = &handle.config;
        let status = self.status.get(destination).await;
        let last_payload = self.status.last_payload(destination).await.map(|n| n.payload);

        Ok(serde_json::json!({
            "config": {
                "id": config.id.as_str(),
                "endpoint_url": config.endpoint_url,
                "api_key": mask_secret(&config.api_key),
                "site_id": config.site_id,
                "queue_capacity": config.queue_capacity,
                "max_sends_per_tick": config.max_sends_per_tick,
                "tick_interval_secs": config.tick_interval.as_secs(),
                "outage_threshold": config.outage_threshold,
            },
            "status": status,
            "last_payload": last_payload,
        }))
    }

    /// Current queue length for a destination.
    pub async fn queue_len(&self, destination: &DestinationId) -> Result<usize> {
        let destinations = self.destinations.read().await;
        let handle = destinations
            .get(destination)
            .ok_or_else(|| DeliveryError::unknown_destination(destination.as_str()))?;
        let len = handle.queue.lock().await.len();
        Ok(len)
    }

    /// Ids of all running destinations.
    pub async fn destination_ids(&self) -> Vec<DestinationId> {
        let mut ids: Vec<DestinationId> =
            self.destinations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every destination, flushing persisted state.
    pub async fn shutdown(&self) {
        let ids = self.destination_ids().await;
        info!(destinations = ids.len(), "shutting down delivery engine");

        for id in ids {
            if let Err(e) = self.stop_destination(&id).await {
                warn!(destination = %id, error = %e, "failed to stop destination cleanly");
            }
        }

        info!("delivery engine shutdown complete");
    }
}
