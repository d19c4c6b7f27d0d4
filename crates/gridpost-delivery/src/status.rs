//! Status aggregator: per-destination delivery status snapshots.
//!
//! Recomputes a read-only snapshot on every attempt and on explicit
//! query, and emits `status` and `all` notifications. The combined
//! notification is a pure composition of the last payload, result, and
//! status — no state of its own.

use std::{collections::HashMap, sync::Arc};

use gridpost_core::{
    events::{CombinedNotice, Notification, NotificationSink, PayloadNotice, ResultNotice},
    models::{DestinationId, OutageState, StatusSnapshot},
};
use tokio::sync::RwLock;

/// Last-known delivery context for one destination.
#[derive(Debug, Clone, Default)]
struct DestinationStatus {
    snapshot: Option<StatusSnapshot>,
    last_payload: Option<PayloadNotice>,
    last_result: Option<ResultNotice>,
}

/// Holds and publishes per-destination status snapshots.
#[derive(Debug)]
pub struct StatusAggregator {
    sink: Arc<dyn NotificationSink>,
    statuses: RwLock<HashMap<DestinationId, DestinationStatus>>,
}

impl StatusAggregator {
    /// Creates an aggregator publishing through the given sink.
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink, statuses: RwLock::new(HashMap::new()) }
    }

    /// Seeds the snapshot for a destination at startup, without emitting
    /// notifications.
    pub async fn seed(
        &self,
        destination: DestinationId,
        outage: &OutageState,
        queue_len: usize,
        evicted_total: u64,
    ) {
        let snapshot = compose_snapshot(&destination, outage, queue_len, evicted_total);
        let mut statuses = self.statuses.write().await;
        statuses.entry(destination).or_default().snapshot = Some(snapshot);
    }

    /// Recomputes the snapshot after an attempt and emits `status` and
    /// `all` notifications.
    pub async fn update(
        &self,
        destination: &DestinationId,
        outage: &OutageState,
        queue_len: usize,
        evicted_total: u64,
        payload: Option<PayloadNotice>,
        result: Option<ResultNotice>,
    ) -> StatusSnapshot {
        let snapshot = compose_snapshot(destination, outage, queue_len, evicted_total);

        let combined = {
            let mut statuses = self.statuses.write().await;
            let entry = statuses.entry(destination.clone()).or_default();
            entry.snapshot = Some(snapshot.clone());
            if let Some(payload) = payload {
                entry.last_payload = Some(payload);
            }
            if let Some(result) = result {
                entry.last_result = Some(result);
            }
            CombinedNotice {
                payload: entry.last_payload.clone(),
                result: entry.last_result.clone(),
                status: snapshot.clone(),
            }
        };

        self.sink.notify(Notification::Status(snapshot.clone())).await;
        self.sink.notify(Notification::All(combined)).await;

        snapshot
    }

    /// Returns the current snapshot for a destination, if known.
    pub async fn get(&self, destination: &DestinationId) -> Option<StatusSnapshot> {
        self.statuses.read().await.get(destination).and_then(|s| s.snapshot.clone())
    }

    /// Returns the current snapshot and re-emits the `status`
    /// notification (explicit query path).
    pub async fn report(&self, destination: &DestinationId) -> Option<StatusSnapshot> {
        let snapshot = self.get(destination).await?;
        self.sink.notify(Notification::Status(snapshot.clone())).await;
        Some(snapshot)
    }

    /// Returns snapshots for every known destination.
    pub async fn all(&self) -> Vec<StatusSnapshot> {
        let mut snapshots: Vec<StatusSnapshot> = self
            .statuses
            .read()
            .await
            .values()
            .filter_map(|s| s.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| a.destination.cmp(&b.destination));
        snapshots
    }

    /// Returns the last masked payload seen for a destination.
    pub async fn last_payload(&self, destination: &DestinationId) -> Option<PayloadNotice> {
        self.statuses.read().await.get(destination).and_then(|s| s.last_payload.clone())
    }

    /// Forgets a destination (teardown).
    pub async fn remove(&self, destination: &DestinationId) {
        self.statuses.write().await.remove(destination);
    }
}

fn compose_snapshot(
    destination: &DestinationId,
    outage: &OutageState,
    queue_len: usize,
    evicted_total: u64,
) -> StatusSnapshot {
    StatusSnapshot {
        destination: destination.clone(),
        queue_len,
        evicted_total,
        consecutive_failures: outage.consecutive_failures,
        outage_since: outage.first_failure_at,
        last_attempt_at: outage.last_attempt_at,
        last_success_at: outage.last_success_at,
        last_error: outage.last_error.clone(),
        last_http_status: outage.last_http_status,
    }
}
