//! Core domain models and strongly-typed identifiers.
//!
//! Defines telemetry readings, destination configuration, queue entries,
//! delivery outcomes, and the outage bookkeeping that the delivery engine
//! persists per destination.

use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strongly-typed destination identifier.
///
/// A destination is one configured ingestion target (API key, site, URL).
/// The id is supplied at setup time and stays stable for the lifetime of
/// the destination; queue snapshots, outage state, and repair issues are
/// all keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);

impl DestinationId {
    /// Creates a destination id from a stable string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DestinationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Scalar value of one telemetry field.
///
/// Power fields are integral watts at the ingestion API; state-of-charge,
/// voltages, and temperatures are floats. The producer decides which
/// variant applies; the delivery engine serializes them untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integral value (e.g. power in W).
    Int(i64),
    /// Floating point value (e.g. battery SoC in %).
    Float(f64),
    /// Textual value (e.g. a pre-formatted timestamp).
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// One immutable telemetry snapshot bound for a destination.
///
/// Created by the producer at sample time, never mutated afterwards, and
/// destroyed when delivered or evicted by queue overflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Destination this reading belongs to.
    pub destination: DestinationId,

    /// Field name to sampled value, in stable order.
    pub fields: BTreeMap<String, FieldValue>,

    /// When the producer sampled the values.
    pub sampled_at: DateTime<Utc>,
}

impl Reading {
    /// Creates an empty reading for a destination.
    pub fn new(destination: DestinationId, sampled_at: DateTime<Utc>) -> Self {
        Self { destination, fields: BTreeMap::new(), sampled_at }
    }

    /// Adds a field value, consuming and returning the reading.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A reading queued for delivery, with its position and attempt history.
///
/// The sequence number is assigned at enqueue time and increases
/// monotonically per destination; delivery order is descending by it
/// (newest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Enqueue sequence number, unique per destination.
    pub seq: u64,

    /// Number of delivery attempts made for this entry.
    pub attempts: u32,

    /// The queued reading.
    pub reading: Reading,
}

/// Structured result of one delivery attempt.
///
/// Failures are data, not errors: a rejected or unreachable endpoint
/// produces an `Outcome` with `success == false`, never a Rust error in
/// the scheduler's control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the remote API accepted the record (HTTP 2xx).
    pub success: bool,

    /// HTTP status code, absent on transport-level failure.
    pub http_status: Option<u16>,

    /// Response body, truncated for exposure.
    pub response_text: Option<String>,

    /// Error description for failed attempts.
    pub error: Option<String>,

    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
}

impl Outcome {
    /// Creates a successful outcome from an accepted response.
    pub fn delivered(status: u16, response_text: String, attempted_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            http_status: Some(status),
            response_text: Some(response_text),
            error: None,
            attempted_at,
        }
    }

    /// Creates a failed outcome from a non-2xx response.
    pub fn rejected(status: u16, response_text: String, attempted_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            http_status: Some(status),
            response_text: Some(response_text.clone()),
            error: Some(format!("HTTP {status}: {response_text}")),
            attempted_at,
        }
    }

    /// Creates a failed outcome from a transport error (no HTTP status).
    pub fn transport(error: impl Into<String>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            http_status: None,
            response_text: None,
            error: Some(error.into()),
            attempted_at,
        }
    }
}

/// Per-destination failure bookkeeping.
///
/// Transitions only through the backoff controller: success resets the
/// failure count and clears the outage start, failure increments the count
/// and pins the start on the first failure after a success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutageState {
    /// Consecutive failed attempts since the last success.
    pub consecutive_failures: u32,

    /// When the current outage began; cleared on success.
    pub first_failure_at: Option<DateTime<Utc>>,

    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,

    /// HTTP status of the most recent attempt, if the endpoint responded.
    pub last_http_status: Option<u16>,

    /// When the most recent attempt was made.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the most recent successful delivery happened.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl OutageState {
    /// Returns true while at least one consecutive failure is recorded.
    pub fn in_outage(&self) -> bool {
        self.consecutive_failures >= 1
    }
}

/// Read-only status projection for one destination.
///
/// Recomputed on every attempt and on explicit query; exposed through the
/// status notification and the diagnostics surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Destination this snapshot describes.
    pub destination: DestinationId,

    /// Number of readings currently queued.
    pub queue_len: usize,

    /// Total readings lost to queue overflow since setup.
    pub evicted_total: u64,

    /// Consecutive failed attempts since the last success.
    pub consecutive_failures: u32,

    /// When the current outage began, if one is in progress.
    pub outage_since: Option<DateTime<Utc>>,

    /// When the most recent attempt was made.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the most recent successful delivery happened.
    pub last_success_at: Option<DateTime<Utc>>,

    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,

    /// HTTP status of the most recent attempt.
    pub last_http_status: Option<u16>,
}

/// Configuration of one ingestion destination.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Stable destination identifier.
    pub id: DestinationId,

    /// Full URL of the ingestion endpoint.
    pub endpoint_url: String,

    /// API key injected into every payload. Masked before any exposure.
    pub api_key: String,

    /// Site identifier injected into every payload.
    pub site_id: String,

    /// Maximum number of queued readings before eviction.
    pub queue_capacity: usize,

    /// Maximum readings delivered per scheduler tick.
    pub max_sends_per_tick: usize,

    /// Interval between periodic delivery ticks.
    pub tick_interval: Duration,

    /// Consecutive failures after which the outage is sustained and a
    /// repair issue opens.
    pub outage_threshold: u32,

    /// Timeout for one delivery request.
    pub http_timeout: Duration,
}

impl DestinationConfig {
    /// Default queue capacity.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 500;
    /// Default batch size per tick.
    pub const DEFAULT_MAX_SENDS_PER_TICK: usize = 10;
    /// Default tick interval.
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(300);
    /// Default sustained-outage threshold.
    pub const DEFAULT_OUTAGE_THRESHOLD: u32 = 3;
    /// Default per-request timeout.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a configuration with defaults for everything but the
    /// destination identity and credentials.
    pub fn new(
        id: impl Into<DestinationId>,
        endpoint_url: impl Into<String>,
        api_key: impl Into<String>,
        site_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            site_id: site_id.into(),
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            max_sends_per_tick: Self::DEFAULT_MAX_SENDS_PER_TICK,
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
            outage_threshold: Self::DEFAULT_OUTAGE_THRESHOLD,
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Validates the configuration before a destination starts.
    pub fn validate(&self) -> Result<(), crate::error::CoreError> {
        use crate::error::CoreError;

        if self.id.as_str().is_empty() {
            return Err(CoreError::invalid_config("destination id must not be empty"));
        }
        if self.endpoint_url.is_empty() {
            return Err(CoreError::invalid_config("endpoint_url must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(CoreError::invalid_config("api_key must not be empty"));
        }
        if self.site_id.trim().is_empty() {
            return Err(CoreError::invalid_config("site_id must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(CoreError::invalid_config("queue_capacity must be greater than 0"));
        }
        if self.max_sends_per_tick == 0 {
            return Err(CoreError::invalid_config("max_sends_per_tick must be greater than 0"));
        }
        if self.outage_threshold == 0 {
            return Err(CoreError::invalid_config("outage_threshold must be greater than 0"));
        }
        if self.http_timeout.is_zero() {
            return Err(CoreError::invalid_config("http_timeout must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reading() -> Reading {
        Reading::new(DestinationId::new("site-a"), Utc::now())
            .with_field("em_power_grid", 1250_i64)
            .with_field("bat_soc", 87.5_f64)
    }

    #[test]
    fn field_values_serialize_as_bare_scalars() {
        let reading = sample_reading();
        let json = serde_json::to_value(&reading.fields).unwrap();

        assert_eq!(json["em_power_grid"], serde_json::json!(1250));
        assert_eq!(json["bat_soc"], serde_json::json!(87.5));
    }

    #[test]
    fn outcome_constructors_classify_attempts() {
        let now = Utc::now();

        let ok = Outcome::delivered(200, "OK".into(), now);
        assert!(ok.success);
        assert_eq!(ok.http_status, Some(200));
        assert!(ok.error.is_none());

        let rejected = Outcome::rejected(422, "bad field".into(), now);
        assert!(!rejected.success);
        assert_eq!(rejected.http_status, Some(422));
        assert_eq!(rejected.error.as_deref(), Some("HTTP 422: bad field"));

        let transport = Outcome::transport("connection refused", now);
        assert!(!transport.success);
        assert_eq!(transport.http_status, None);
        assert_eq!(transport.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn outage_state_defaults_to_clear() {
        let state = OutageState::default();
        assert!(!state.in_outage());
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.first_failure_at.is_none());
    }

    #[test]
    fn destination_config_validation() {
        let config = DestinationConfig::new("site-a", "https://ingest.example/api", "key", "fid");
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.queue_capacity = 0;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.api_key = "  ".into();
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.outage_threshold = 0;
        assert!(bad.validate().is_err());
    }
}
