//! Notification system for decoupled diagnostics integration.
//!
//! The delivery engine reports payloads, attempt results, and status
//! snapshots through an injected sink trait rather than a concrete
//! transport. Notifications are fire-and-forget: their loss never affects
//! queue or retry correctness, and sinks must not propagate failures back
//! into delivery processing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{DestinationId, Outcome, StatusSnapshot};

/// Why a delivery batch was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Periodic scheduler tick.
    Scheduled,
    /// Operator-requested send.
    Manual,
    /// Host-specific trigger outside the scheduler's own vocabulary.
    Other,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Masked payload emitted before a delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadNotice {
    /// Destination the payload is bound for.
    pub destination: DestinationId,

    /// Payload copy with secrets masked.
    pub payload: Value,

    /// Why the attempt was triggered.
    pub reason: TriggerReason,
}

/// Attempt outcome emitted after a delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNotice {
    /// Destination the attempt targeted.
    pub destination: DestinationId,

    /// Structured result of the attempt.
    pub outcome: Outcome,
}

/// Composition of the most recent payload, result, and status.
///
/// Pure projection of the last three notices; carries no state of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedNotice {
    /// Last masked payload, if any attempt was made.
    pub payload: Option<PayloadNotice>,

    /// Last attempt result, if any attempt was made.
    pub result: Option<ResultNotice>,

    /// Current status snapshot.
    pub status: StatusSnapshot,
}

/// Notifications emitted by the delivery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Masked payload about to be delivered.
    Payload(PayloadNotice),

    /// Result of a delivery attempt.
    Result(ResultNotice),

    /// Updated status snapshot.
    Status(StatusSnapshot),

    /// Composition of the last payload, result, and status.
    All(CombinedNotice),
}

/// Trait for receiving delivery notifications.
///
/// Implementations must not block delivery processing; failures are logged
/// by the sink itself and never returned to the caller.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync + std::fmt::Debug {
    /// Handles one notification, best-effort.
    async fn notify(&self, notification: Notification);
}

/// Sink that discards all notifications.
#[derive(Debug, Default)]
pub struct NoOpSink;

impl NoOpSink {
    /// Creates a new no-op sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl NotificationSink for NoOpSink {
    async fn notify(&self, _notification: Notification) {}
}

/// Sink that logs notifications through `tracing`.
///
/// The production default when no external diagnostics transport is wired
/// in. Payloads arriving here are already masked.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Creates a new tracing sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Payload(notice) => tracing::debug!(
                destination = %notice.destination,
                reason = %notice.reason,
                payload = %notice.payload,
                "outgoing payload"
            ),
            Notification::Result(notice) => tracing::debug!(
                destination = %notice.destination,
                success = notice.outcome.success,
                http_status = ?notice.outcome.http_status,
                "delivery result"
            ),
            Notification::Status(snapshot) => tracing::debug!(
                destination = %snapshot.destination,
                queue_len = snapshot.queue_len,
                consecutive_failures = snapshot.consecutive_failures,
                "status updated"
            ),
            Notification::All(_) => {},
        }
    }
}

/// Sink that forwards notifications to multiple subscribers.
///
/// Subscribers receive every notification concurrently; none of them can
/// delay or fail the others.
#[derive(Debug, Clone, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl MulticastSink {
    /// Creates a multicast sink with no subscribers.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait::async_trait]
impl NotificationSink for MulticastSink {
    async fn notify(&self, notification: Notification) {
        let futures = self.sinks.iter().map(|sink| {
            let notification = notification.clone();
            async move {
                sink.notify(notification).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;

    #[derive(Debug)]
    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl CountingSink {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            (Self { count: count.clone() }, count)
        }
    }

    #[async_trait::async_trait]
    impl NotificationSink for CountingSink {
        async fn notify(&self, _notification: Notification) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_notification() -> Notification {
        Notification::Result(ResultNotice {
            destination: DestinationId::new("site-a"),
            outcome: Outcome::delivered(200, "OK".into(), Utc::now()),
        })
    }

    #[tokio::test]
    async fn no_op_sink_discards_notifications() {
        NoOpSink::new().notify(sample_notification()).await;
    }

    #[tokio::test]
    async fn multicast_forwards_to_all_subscribers() {
        let mut multicast = MulticastSink::new();
        let (first, first_count) = CountingSink::new();
        let (second, second_count) = CountingSink::new();

        multicast.add_subscriber(Arc::new(first));
        multicast.add_subscriber(Arc::new(second));
        assert_eq!(multicast.subscriber_count(), 2);

        multicast.notify(sample_notification()).await;

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multicast_with_no_subscribers_is_harmless() {
        MulticastSink::new().notify(sample_notification()).await;
    }

    #[test]
    fn notification_kind_tags_are_stable() {
        let json = serde_json::to_value(sample_notification()).unwrap();
        assert_eq!(json["kind"], "result");
    }
}
