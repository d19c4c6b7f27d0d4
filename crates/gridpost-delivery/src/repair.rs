//! Repair manager: one self-clearing outage issue per destination.
//!
//! Maps the backoff controller's outage state onto an external issue sink
//! (a repair/alerting system). A sustained outage opens exactly one issue
//! whose id is derived from the destination id; further failures refresh
//! the issue in place, and the next successful delivery closes it. No
//! manual acknowledge state exists here.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use gridpost_core::models::{DestinationId, OutageState};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Details carried by an outage issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDetails {
    /// Destination in outage.
    pub destination: DestinationId,

    /// Consecutive failed attempts so far.
    pub consecutive_failures: u32,

    /// When the outage began.
    pub outage_since: Option<DateTime<Utc>>,

    /// Most recent failure description.
    pub last_error: Option<String>,
}

/// External repair/alerting system.
///
/// Exactly the three operations the repair manager needs. Implementations
/// handle their own failures; issue delivery is best-effort and never
/// affects retry correctness.
#[async_trait::async_trait]
pub trait IssueSink: Send + Sync + std::fmt::Debug {
    /// Opens a new issue.
    async fn open(&self, issue_id: &str, details: &IssueDetails);

    /// Refreshes an existing issue's details.
    async fn update(&self, issue_id: &str, details: &IssueDetails);

    /// Closes an issue.
    async fn close(&self, issue_id: &str);
}

/// Issue sink that reports outages through `tracing`.
///
/// The production default when no external alerting system is wired in.
#[derive(Debug, Default)]
pub struct TracingIssueSink;

impl TracingIssueSink {
    /// Creates a new tracing issue sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl IssueSink for TracingIssueSink {
    async fn open(&self, issue_id: &str, details: &IssueDetails) {
        warn!(
            issue_id,
            destination = %details.destination,
            consecutive_failures = details.consecutive_failures,
            outage_since = ?details.outage_since,
            last_error = ?details.last_error,
            "sustained outage, opening issue"
        );
    }

    async fn update(&self, issue_id: &str, details: &IssueDetails) {
        warn!(
            issue_id,
            consecutive_failures = details.consecutive_failures,
            last_error = ?details.last_error,
            "outage continuing"
        );
    }

    async fn close(&self, issue_id: &str) {
        info!(issue_id, "destination recovered, closing issue");
    }
}

/// Per-destination issue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairState {
    Clear,
    Open,
}

/// Maintains at most one open issue per destination.
///
/// Sole writer of issue state: `Clear -> Open` on crossing the sustained
/// threshold, `Open -> Open` refresh on further failures, `Open -> Clear`
/// on the next success. Issue identity is stable for the lifetime of one
/// continuous outage.
#[derive(Debug)]
pub struct RepairManager {
    sink: Arc<dyn IssueSink>,
    states: RwLock<HashMap<DestinationId, RepairState>>,
}

impl RepairManager {
    /// Creates a repair manager reporting to the given sink.
    pub fn new(sink: Arc<dyn IssueSink>) -> Self {
        Self { sink, states: RwLock::new(HashMap::new()) }
    }

    /// Derives the stable issue id for a destination.
    pub fn issue_id(destination: &DestinationId) -> String {
        format!("outage:{destination}")
    }

    /// Applies the latest outage state for a destination.
    ///
    /// `sustained` is the backoff policy's judgement of the state. Opening
    /// is idempotent: re-triggering while already open refreshes the
    /// existing issue and never creates a duplicate.
    pub async fn observe(
        &self,
        destination: &DestinationId,
        outage: &OutageState,
        sustained: bool,
    ) {
        let issue_id = Self::issue_id(destination);
        let mut states = self.states.write().await;
        let current = states.get(destination).copied().unwrap_or(RepairState::Clear);

        if !outage.in_outage() {
            if current == RepairState::Open {
                states.insert(destination.clone(), RepairState::Clear);
                drop(states);
                self.sink.close(&issue_id).await;
            }
            return;
        }

        if !sustained {
            return;
        }

        let details = IssueDetails {
            destination: destination.clone(),
            consecutive_failures: outage.consecutive_failures,
            outage_since: outage.first_failure_at,
            last_error: outage.last_error.clone(),
        };

        match current {
            RepairState::Clear => {
                states.insert(destination.clone(), RepairState::Open);
                drop(states);
                self.sink.open(&issue_id, &details).await;
            },
            RepairState::Open => {
                drop(states);
                self.sink.update(&issue_id, &details).await;
            },
        }
    }

    /// Closes any open issue and forgets the destination (teardown).
    pub async fn clear(&self, destination: &DestinationId) {
        let removed = self.states.write().await.remove(destination);
        if removed == Some(RepairState::Open) {
            self.sink.close(&Self::issue_id(destination)).await;
        }
    }

    /// Whether an issue is currently open for a destination.
    pub async fn is_open(&self, destination: &DestinationId) -> bool {
        self.states.read().await.get(destination).copied() == Some(RepairState::Open)
    }
}

pub mod mock {
    //! Recording issue sink for tests.

    use std::sync::Mutex;

    use super::{IssueDetails, IssueSink};

    /// One recorded issue operation.
    #[derive(Debug, Clone, PartialEq)]
    pub enum IssueOp {
        /// `open(issue_id, consecutive_failures)`
        Open(String, u32),
        /// `update(issue_id, consecutive_failures)`
        Update(String, u32),
        /// `close(issue_id)`
        Close(String),
    }

    /// Issue sink that records every operation for verification.
    #[derive(Debug, Default)]
    pub struct RecordingIssueSink {
        ops: Mutex<Vec<IssueOp>>,
    }

    impl RecordingIssueSink {
        /// Creates an empty recording sink.
        pub fn new() -> Self {
            Self::default()
        }

        /// Returns all recorded operations.
        pub fn ops(&self) -> Vec<IssueOp> {
            self.ops.lock().expect("sink lock").clone()
        }

        /// Counts recorded opens.
        pub fn open_count(&self) -> usize {
            self.ops().iter().filter(|op| matches!(op, IssueOp::Open(..))).count()
        }

        /// Counts recorded closes.
        pub fn close_count(&self) -> usize {
            self.ops().iter().filter(|op| matches!(op, IssueOp::Close(..))).count()
        }
    }

    #[async_trait::async_trait]
    impl IssueSink for RecordingIssueSink {
        async fn open(&self, issue_id: &str, details: &IssueDetails) {
            self.ops
                .lock()
                .expect("sink lock")
                .push(IssueOp::Open(issue_id.to_string(), details.consecutive_failures));
        }

        async fn update(&self, issue_id: &str, details: &IssueDetails) {
            self.ops
                .lock()
                .expect("sink lock")
                .push(IssueOp::Update(issue_id.to_string(), details.consecutive_failures));
        }

        async fn close(&self, issue_id: &str) {
            self.ops.lock().expect("sink lock").push(IssueOp::Close(issue_id.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use gridpost_core::models::Outcome;

    use super::{mock::*, *};
    use crate::backoff::{apply_outcome, BackoffPolicy};

    fn failing_state(failures: u32) -> OutageState {
        let mut state = OutageState::default();
        for _ in 0..failures {
            state = apply_outcome(&state, &Outcome::transport("refused", Utc::now()));
        }
        state
    }

    #[tokio::test]
    async fn opens_once_per_continuous_outage() {
        let sink = Arc::new(RecordingIssueSink::new());
        let manager = RepairManager::new(sink.clone());
        let destination = DestinationId::new("site-a");
        let policy = BackoffPolicy { sustained_threshold: 3, ..Default::default() };

        for failures in 1..=6 {
            let state = failing_state(failures);
            manager.observe(&destination, &state, policy.is_sustained(&state)).await;
        }

        // one open at the threshold, refreshed afterwards, no duplicates
        assert_eq!(sink.open_count(), 1);
        let ops = sink.ops();
        assert_eq!(ops[0], IssueOp::Open("outage:site-a".to_string(), 3));
        assert!(ops[1..].iter().all(|op| matches!(op, IssueOp::Update(..))));
    }

    #[tokio::test]
    async fn closes_on_the_very_next_success() {
        let sink = Arc::new(RecordingIssueSink::new());
        let manager = RepairManager::new(sink.clone());
        let destination = DestinationId::new("site-a");
        let policy = BackoffPolicy { sustained_threshold: 3, ..Default::default() };

        let state = failing_state(3);
        manager.observe(&destination, &state, policy.is_sustained(&state)).await;
        assert!(manager.is_open(&destination).await);

        let recovered = apply_outcome(&state, &Outcome::delivered(200, "OK".into(), Utc::now()));
        manager.observe(&destination, &recovered, policy.is_sustained(&recovered)).await;

        assert!(!manager.is_open(&destination).await);
        assert_eq!(sink.close_count(), 1);
        assert_eq!(sink.ops().last(), Some(&IssueOp::Close("outage:site-a".to_string())));
    }

    #[tokio::test]
    async fn below_threshold_failures_never_open() {
        let sink = Arc::new(RecordingIssueSink::new());
        let manager = RepairManager::new(sink.clone());
        let destination = DestinationId::new("site-a");
        let policy = BackoffPolicy { sustained_threshold: 3, ..Default::default() };

        for failures in 1..=2 {
            let state = failing_state(failures);
            manager.observe(&destination, &state, policy.is_sustained(&state)).await;
        }

        assert_eq!(sink.ops(), Vec::new());
        assert!(!manager.is_open(&destination).await);
    }

    #[tokio::test]
    async fn success_without_open_issue_is_silent() {
        let sink = Arc::new(RecordingIssueSink::new());
        let manager = RepairManager::new(sink.clone());
        let destination = DestinationId::new("site-a");

        let state = apply_outcome(
            &OutageState::default(),
            &Outcome::delivered(200, "OK".into(), Utc::now()),
        );
        manager.observe(&destination, &state, false).await;

        assert_eq!(sink.ops(), Vec::new());
    }

    #[tokio::test]
    async fn teardown_closes_open_issue() {
        let sink = Arc::new(RecordingIssueSink::new());
        let manager = RepairManager::new(sink.clone());
        let destination = DestinationId::new("site-a");

        let state = failing_state(3);
        manager.observe(&destination, &state, true).await;
        manager.clear(&destination).await;

        assert_eq!(sink.close_count(), 1);
        assert!(!manager.is_open(&destination).await);
    }
}
