//! Per-destination delivery scheduler.
//!
//! One worker task per destination drives periodic ticks and coalesced
//! manual triggers through a single entry point, so only one delivery
//! attempt is ever in flight per destination. A batch pulls readings
//! newest-first and stops at the first failure: a failing endpoint is
//! unlikely to accept the next record either, and stopping early keeps
//! a failed reading ahead of everything older than it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use gridpost_core::{
    events::{NotificationSink, PayloadNotice, ResultNotice, TriggerReason},
    models::{DestinationConfig, OutageState},
    time::Clock,
};
use tokio::{
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    backoff::{apply_outcome, BackoffPolicy},
    client::TransmissionClient,
    queue::DurableQueue,
    repair::RepairManager,
    status::StatusAggregator,
};

/// Worker task processing deliveries for one destination.
///
/// Owns the destination's outage state at runtime; the queue is shared
/// with the engine so producers can enqueue concurrently. The `running`
/// flag is the re-entrancy guard: manual triggers arriving while a batch
/// runs are no-ops, never cancellations of the in-flight attempt.
pub(crate) struct DestinationWorker {
    config: DestinationConfig,
    queue: Arc<Mutex<DurableQueue>>,
    outage: OutageState,
    client: Arc<TransmissionClient>,
    policy: BackoffPolicy,
    repair: Arc<RepairManager>,
    status: Arc<StatusAggregator>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl DestinationWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: DestinationConfig,
        queue: Arc<Mutex<DurableQueue>>,
        outage: OutageState,
        client: Arc<TransmissionClient>,
        policy: BackoffPolicy,
        repair: Arc<RepairManager>,
        status: Arc<StatusAggregator>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        running: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            queue,
            outage,
            client,
            policy,
            repair,
            status,
            sink,
            clock,
            running,
            cancel,
        }
    }

    /// Main worker loop: ticks, triggers, and shutdown.
    pub(crate) async fn run(mut self, mut trigger_rx: mpsc::Receiver<TriggerReason>) {
        info!(
            destination = %self.config.id,
            tick_interval_secs = self.config.tick_interval.as_secs(),
            "delivery worker starting"
        );

        let cancel = self.cancel.clone();
        let first_tick = tokio::time::Instant::now() + self.config.tick_interval;
        let mut ticker = tokio::time::interval_at(first_tick, self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_batch(TriggerReason::Scheduled).await,
                Some(reason) = trigger_rx.recv() => self.run_batch(reason).await,
            }
        }

        // flush the snapshot before exit; in-flight entries stay queued
        self.queue.lock().await.persist();
        info!(destination = %self.config.id, "delivery worker stopped");
    }

    async fn run_batch(&mut self, reason: TriggerReason) {
        self.running.store(true, Ordering::SeqCst);
        self.process_batch(reason).await;
        self.running.store(false, Ordering::SeqCst);
    }

    /// Delivers up to `max_sends_per_tick` readings, newest first.
    async fn process_batch(&mut self, reason: TriggerReason) {
        // Periodic ticks respect backoff; manual triggers bypass it
        // (operator intent) but never the single-in-flight guard.
        if reason == TriggerReason::Scheduled {
            if let Some(eligible_at) = self.policy.next_eligible_at(&self.outage) {
                let now = self.clock.now();
                if now < eligible_at {
                    debug!(
                        destination = %self.config.id,
                        eligible_at = %eligible_at,
                        "backing off, skipping tick"
                    );
                    return;
                }
            }
        }

        let batch =
            self.queue.lock().await.peek_newest_batch(self.config.max_sends_per_tick);
        if batch.is_empty() {
            return;
        }

        debug!(
            destination = %self.config.id,
            batch_size = batch.len(),
            reason = %reason,
            "processing delivery batch"
        );

        for entry in batch {
            let attempt = self
                .client
                .deliver(
                    &entry.reading,
                    &self.config,
                    reason,
                    self.sink.as_ref(),
                    self.clock.now(),
                )
                .await;
            let success = attempt.outcome.success;

            self.outage = apply_outcome(&self.outage, &attempt.outcome);
            let sustained = self.policy.is_sustained(&self.outage);

            let (queue_len, evicted_total) = {
                let mut queue = self.queue.lock().await;
                if success {
                    queue.remove_delivered(entry.seq);
                } else {
                    queue.requeue_failed(entry.seq);
                }
                queue.store_outage(self.outage.clone());
                (queue.len(), queue.evicted_total())
            };

            self.repair.observe(&self.config.id, &self.outage, sustained).await;
            self.status
                .update(
                    &self.config.id,
                    &self.outage,
                    queue_len,
                    evicted_total,
                    Some(PayloadNotice {
                        destination: self.config.id.clone(),
                        payload: attempt.masked_payload,
                        reason,
                    }),
                    Some(ResultNotice {
                        destination: self.config.id.clone(),
                        outcome: attempt.outcome,
                    }),
                )
                .await;

            if !success {
                break;
            }
        }
    }
}
