//! Backoff controller: pure outage-state transitions and retry timing.
//!
//! Applying an attempt outcome to an `OutageState` is a pure function, as
//! is computing the next-eligible time from a state. The delay curve is
//! exponential with a cap and carries no jitter: given the same failure
//! count it always produces the same delay, so retry timing is fully
//! deterministic and testable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gridpost_core::models::{Outcome, OutageState};

/// Policy governing retry timing and the sustained-outage threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Upper bound for the delay regardless of failure count.
    pub max_delay: Duration,

    /// Consecutive failures after which the outage counts as sustained.
    pub sustained_threshold: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            sustained_threshold: 3,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for a given consecutive-failure count.
    ///
    /// Doubles per failure from `base_delay`, capped at `max_delay`.
    /// Zero failures means no delay. Monotonic non-decreasing in the
    /// failure count, and always finite: a record is never starved.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = consecutive_failures.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Returns when the destination becomes eligible for the next
    /// scheduled attempt, or `None` when it is eligible immediately.
    pub fn next_eligible_at(&self, state: &OutageState) -> Option<DateTime<Utc>> {
        if state.consecutive_failures == 0 {
            return None;
        }
        let last_attempt = state.last_attempt_at?;
        let delay = chrono::Duration::from_std(self.delay_for(state.consecutive_failures)).ok()?;
        Some(last_attempt + delay)
    }

    /// Whether the outage has lasted long enough to open a repair issue.
    pub fn is_sustained(&self, state: &OutageState) -> bool {
        state.consecutive_failures >= self.sustained_threshold
    }
}

/// Applies one attempt outcome to an outage state.
///
/// Success resets the consecutive-failure count and clears the outage
/// start; failure increments the count and pins `first_failure_at` on the
/// first failure after a success. This is the only place outage state
/// transitions happen.
pub fn apply_outcome(state: &OutageState, outcome: &Outcome) -> OutageState {
    let mut next = state.clone();
    next.last_attempt_at = Some(outcome.attempted_at);
    next.last_http_status = outcome.http_status;

    if outcome.success {
        next.consecutive_failures = 0;
        next.first_failure_at = None;
        next.last_error = None;
        next.last_success_at = Some(outcome.attempted_at);
    } else {
        if next.consecutive_failures == 0 {
            next.first_failure_at = Some(outcome.attempted_at);
        }
        next.consecutive_failures = next.consecutive_failures.saturating_add(1);
        next.last_error = outcome.error.clone();
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure_at(ts: DateTime<Utc>) -> Outcome {
        Outcome::transport("connection refused", ts)
    }

    fn success_at(ts: DateTime<Utc>) -> Outcome {
        Outcome::delivered(200, "OK".into(), ts)
    }

    #[test]
    fn failure_count_grows_and_first_failure_pins() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);

        let state = apply_outcome(&OutageState::default(), &failure_at(t0));
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.first_failure_at, Some(t0));

        let state = apply_outcome(&state, &failure_at(t1));
        assert_eq!(state.consecutive_failures, 2);
        // outage start stays pinned to the first failure
        assert_eq!(state.first_failure_at, Some(t0));
        assert_eq!(state.last_attempt_at, Some(t1));
    }

    #[test]
    fn success_resets_only_on_success() {
        let t0 = Utc::now();
        let mut state = OutageState::default();
        for i in 0..4 {
            state = apply_outcome(&state, &failure_at(t0 + chrono::Duration::minutes(i)));
        }
        assert_eq!(state.consecutive_failures, 4);

        let t_ok = t0 + chrono::Duration::minutes(10);
        let state = apply_outcome(&state, &success_at(t_ok));
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.first_failure_at.is_none());
        assert!(state.last_error.is_none());
        assert_eq!(state.last_success_at, Some(t_ok));
        assert_eq!(state.last_http_status, Some(200));
    }

    #[test]
    fn rejected_outcome_records_status_and_error() {
        let t0 = Utc::now();
        let state = apply_outcome(&OutageState::default(), &Outcome::rejected(503, "busy".into(), t0));

        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_http_status, Some(503));
        assert_eq!(state.last_error.as_deref(), Some("HTTP 503: busy"));
    }

    #[test]
    fn delay_curve_is_deterministic_and_monotonic() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            sustained_threshold: 3,
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
        // repeated evaluation yields the same delay
        assert_eq!(policy.delay_for(3), policy.delay_for(3));

        let mut previous = Duration::ZERO;
        for failures in 0..40 {
            let delay = policy.delay_for(failures);
            assert!(delay >= previous, "delay must be non-decreasing");
            assert!(delay <= Duration::from_secs(3600), "delay must stay capped");
            previous = delay;
        }
    }

    #[test]
    fn eligibility_follows_last_attempt_plus_delay() {
        let policy = BackoffPolicy::default();
        let t0 = Utc::now();

        let clear = OutageState::default();
        assert!(policy.next_eligible_at(&clear).is_none());

        let state = apply_outcome(&clear, &failure_at(t0));
        let eligible = policy.next_eligible_at(&state).expect("failed state has a retry time");
        assert_eq!(eligible, t0 + chrono::Duration::seconds(60));

        // never starved: eligibility is always a finite time
        let mut state = state;
        for i in 0..50 {
            state = apply_outcome(&state, &failure_at(t0 + chrono::Duration::minutes(i)));
        }
        assert!(policy.next_eligible_at(&state).is_some());
    }

    #[test]
    fn sustained_threshold_is_explicit() {
        let policy = BackoffPolicy { sustained_threshold: 3, ..Default::default() };
        let t0 = Utc::now();

        let mut state = OutageState::default();
        state = apply_outcome(&state, &failure_at(t0));
        assert!(!policy.is_sustained(&state));
        state = apply_outcome(&state, &failure_at(t0));
        assert!(!policy.is_sustained(&state));
        state = apply_outcome(&state, &failure_at(t0));
        assert!(policy.is_sustained(&state));
    }
}
