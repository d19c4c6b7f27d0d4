//! Bounded durable queue of pending readings for one destination.
//!
//! The queue is the durable owner of a destination's persisted state:
//! every mutation (enqueue, delivered, requeue, outage update) writes a
//! fresh snapshot through the state store, so a crash at any point
//! reloads exactly the committed pending set. An entry mid-delivery at
//! crash time reappears as pending — delivery is at-most-once per
//! attempt, not exactly-once end-to-end.

use std::{collections::BTreeMap, sync::Arc};

use gridpost_core::models::{DestinationId, OutageState, QueueEntry, Reading};
use tracing::{error, warn};

use crate::{
    error::Result,
    store::{PersistedState, StateStore},
};

/// Bounded, persisted buffer of pending readings.
///
/// Ordering policy: delivery always selects entries in descending
/// sequence-number order (newest first). When a backlog exists, getting
/// the current reading out is worth more than draining history. Overflow
/// evicts the oldest entry — the only data-loss path, and it is counted.
#[derive(Debug)]
pub struct DurableQueue {
    destination: DestinationId,
    capacity: usize,
    entries: BTreeMap<u64, QueueEntry>,
    next_seq: u64,
    evicted_total: u64,
    outage: OutageState,
    store: Arc<dyn StateStore>,
    save_failures: u64,
}

impl DurableQueue {
    /// Opens the queue for a destination, reloading any persisted state.
    ///
    /// # Errors
    ///
    /// Returns a store error if the snapshot cannot be loaded; the
    /// destination must not start with a silently empty queue.
    pub fn open(
        destination: DestinationId,
        capacity: usize,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let persisted = store.load(&destination)?.unwrap_or_default();

        let mut entries = BTreeMap::new();
        for entry in persisted.entries {
            entries.insert(entry.seq, entry);
        }

        Ok(Self {
            destination,
            capacity,
            entries,
            next_seq: persisted.next_seq,
            evicted_total: persisted.evicted_total,
            outage: persisted.outage,
            store,
            save_failures: 0,
        })
    }

    /// Enqueues a reading, evicting the oldest entry when at capacity.
    ///
    /// Returns the evicted reading, if any. Eviction removes the entry
    /// with the lowest sequence number, never the newest.
    pub fn enqueue(&mut self, reading: Reading) -> Option<Reading> {
        // A snapshot can hold more entries than a lowered capacity allows;
        // evict down until the new entry fits.
        let mut evicted = None;
        while self.entries.len() >= self.capacity {
            let Some((&oldest_seq, _)) = self.entries.iter().next() else {
                break;
            };
            let entry = self.entries.remove(&oldest_seq).expect("oldest entry present");
            self.evicted_total += 1;
            warn!(
                destination = %self.destination,
                seq = oldest_seq,
                evicted_total = self.evicted_total,
                "queue at capacity, evicting oldest reading"
            );
            evicted = Some(entry.reading);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(seq, QueueEntry { seq, attempts: 0, reading });
        self.persist();

        evicted
    }

    /// Returns up to `max_count` entries, newest first.
    pub fn peek_newest_batch(&self, max_count: usize) -> Vec<QueueEntry> {
        self.entries.values().rev().take(max_count).cloned().collect()
    }

    /// Removes a delivered entry.
    pub fn remove_delivered(&mut self, seq: u64) {
        if self.entries.remove(&seq).is_some() {
            self.persist();
        }
    }

    /// Returns a failed entry to the pending set with its attempt count
    /// bumped. The entry keeps its sequence number, so it stays first in
    /// newest-first order until something newer arrives.
    pub fn requeue_failed(&mut self, seq: u64) {
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.attempts += 1;
            self.persist();
        }
    }

    /// Replaces the persisted outage state.
    pub fn store_outage(&mut self, outage: OutageState) {
        self.outage = outage;
        self.persist();
    }

    /// Returns the persisted outage state.
    pub fn outage(&self) -> &OutageState {
        &self.outage
    }

    /// Number of pending readings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total readings lost to overflow since setup.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Number of snapshot writes that failed since open.
    pub fn save_failures(&self) -> u64 {
        self.save_failures
    }

    /// Writes the current snapshot to the store.
    ///
    /// Called automatically on every mutation; exposed so shutdown can
    /// force a final flush. Save failures are logged and counted, never
    /// raised into scheduler control flow.
    pub fn persist(&mut self) {
        let state = PersistedState {
            next_seq: self.next_seq,
            evicted_total: self.evicted_total,
            entries: self.entries.values().cloned().collect(),
            outage: self.outage.clone(),
        };

        if let Err(e) = self.store.save(&self.destination, &state) {
            self.save_failures += 1;
            error!(
                destination = %self.destination,
                save_failures = self.save_failures,
                error = %e,
                "failed to persist queue snapshot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use gridpost_core::models::FieldValue;

    use super::*;
    use crate::store::mock::MockStateStore;

    fn reading(tag: i64) -> Reading {
        Reading::new(DestinationId::new("site-a"), Utc::now()).with_field("em_power_grid", tag)
    }

    fn open_queue(capacity: usize, store: Arc<MockStateStore>) -> DurableQueue {
        DurableQueue::open(DestinationId::new("site-a"), capacity, store).unwrap()
    }

    fn grid_value(entry: &QueueEntry) -> i64 {
        match entry.reading.fields.get("em_power_grid") {
            Some(FieldValue::Int(v)) => *v,
            other => panic!("unexpected field value: {other:?}"),
        }
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let store = Arc::new(MockStateStore::new());
        let mut queue = open_queue(3, store);

        // A, B, C, D with capacity 3 -> A evicted, {B, C, D} retained
        assert!(queue.enqueue(reading(1)).is_none());
        assert!(queue.enqueue(reading(2)).is_none());
        assert!(queue.enqueue(reading(3)).is_none());
        let evicted = queue.enqueue(reading(4)).expect("oldest should be evicted");

        assert_eq!(evicted.fields.get("em_power_grid"), Some(&FieldValue::Int(1)));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted_total(), 1);

        let batch = queue.peek_newest_batch(10);
        let values: Vec<i64> = batch.iter().map(grid_value).collect();
        assert_eq!(values, vec![4, 3, 2]);
    }

    #[test]
    fn batch_is_descending_by_sequence() {
        let store = Arc::new(MockStateStore::new());
        let mut queue = open_queue(10, store);

        for tag in 1..=5 {
            queue.enqueue(reading(tag));
        }

        let batch = queue.peek_newest_batch(3);
        let seqs: Vec<u64> = batch.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 3, 2]);
    }

    #[test]
    fn requeued_entry_keeps_its_position_and_counts_attempts() {
        let store = Arc::new(MockStateStore::new());
        let mut queue = open_queue(10, store);

        queue.enqueue(reading(1));
        queue.enqueue(reading(2));

        let newest = queue.peek_newest_batch(1)[0].clone();
        queue.requeue_failed(newest.seq);

        let batch = queue.peek_newest_batch(2);
        assert_eq!(batch[0].seq, newest.seq);
        assert_eq!(batch[0].attempts, 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_delivered_drops_entry() {
        let store = Arc::new(MockStateStore::new());
        let mut queue = open_queue(10, store);

        queue.enqueue(reading(1));
        queue.enqueue(reading(2));
        let newest = queue.peek_newest_batch(1)[0].seq;

        queue.remove_delivered(newest);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_newest_batch(1)[0].seq, newest - 1);
    }

    #[test]
    fn state_survives_reopen() {
        let store = Arc::new(MockStateStore::new());
        {
            let mut queue = open_queue(10, store.clone());
            queue.enqueue(reading(1));
            queue.enqueue(reading(2));
            let newest = queue.peek_newest_batch(1)[0].seq;
            queue.requeue_failed(newest);
        }

        // reopen: the requeued entry reappears as pending, exactly once
        let queue = open_queue(10, store);
        assert_eq!(queue.len(), 2);
        let batch = queue.peek_newest_batch(10);
        assert_eq!(batch[0].attempts, 1);
        let seqs: Vec<u64> = batch.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 0]);
    }

    #[test]
    fn sequence_numbers_keep_increasing_after_reload() {
        let store = Arc::new(MockStateStore::new());
        {
            let mut queue = open_queue(10, store.clone());
            queue.enqueue(reading(1));
        }

        let mut queue = open_queue(10, store);
        queue.enqueue(reading(2));

        let seqs: Vec<u64> = queue.peek_newest_batch(10).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 0]);
    }

    #[test]
    fn save_failures_are_counted_not_raised() {
        let store = Arc::new(MockStateStore::new());
        let mut queue = open_queue(10, store.clone());

        store.inject_save_error("disk full");
        queue.enqueue(reading(1));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.save_failures(), 1);
    }

    #[test]
    fn load_failure_is_fatal() {
        let store = Arc::new(MockStateStore::new());
        store.inject_load_error("corrupt snapshot");

        let result = DurableQueue::open(DestinationId::new("site-a"), 10, store);
        assert!(result.is_err());
    }
}
