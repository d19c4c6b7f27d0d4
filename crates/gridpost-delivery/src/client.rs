//! HTTP client performing one delivery attempt per pending reading.
//!
//! Builds the ingestion payload, emits the masked payload notification,
//! performs one bounded-timeout POST, and maps the response into a
//! structured `Outcome`. Transport failures and non-2xx responses are
//! both outcomes, never errors: the scheduler decides what to do with
//! them by policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gridpost_core::{
    events::{Notification, NotificationSink, PayloadNotice, ResultNotice, TriggerReason},
    mask::mask_payload,
    models::{DestinationConfig, Outcome, Reading},
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Timestamp format the ingestion API expects.
const DATAPOINT_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum response-body length exposed in outcomes and notifications.
const MAX_RESPONSE_TEXT: usize = 300;

/// Configuration for the transmission client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fallback timeout when a destination does not configure one.
    pub timeout: Duration,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(60), user_agent: "gridpost/0.1".to_string() }
    }
}

/// Result of one delivery attempt, with the masked payload that was
/// announced for it.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Structured outcome of the attempt.
    pub outcome: Outcome,

    /// Masked copy of the payload, for diagnostics composition.
    pub masked_payload: Value,
}

/// HTTP client for telemetry delivery.
///
/// One shared connection pool serves all destinations; the per-request
/// timeout comes from the destination configuration.
#[derive(Debug, Clone)]
pub struct TransmissionClient {
    client: reqwest::Client,
}

impl TransmissionClient {
    /// Creates a new transmission client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&ClientConfig::default())
    }

    /// Delivers one reading to its destination.
    ///
    /// Emits a masked `payload` notification before the call and a
    /// `result` notification after it; both are best-effort and never
    /// affect the returned outcome. The unmasked payload exists only
    /// inside this method.
    pub async fn deliver(
        &self,
        reading: &Reading,
        destination: &DestinationConfig,
        reason: TriggerReason,
        sink: &dyn NotificationSink,
        attempted_at: DateTime<Utc>,
    ) -> DeliveryAttempt {
        let payload = build_payload(reading, destination);
        let masked_payload = mask_payload(&payload);

        sink.notify(Notification::Payload(PayloadNotice {
            destination: destination.id.clone(),
            payload: masked_payload.clone(),
            reason,
        }))
        .await;

        debug!(
            destination = %destination.id,
            url = %destination.endpoint_url,
            reason = %reason,
            "attempting delivery"
        );

        let outcome = self.post_payload(&payload, destination, attempted_at).await;

        if outcome.success {
            debug!(
                destination = %destination.id,
                http_status = ?outcome.http_status,
                "reading delivered"
            );
        } else {
            warn!(
                destination = %destination.id,
                http_status = ?outcome.http_status,
                error = ?outcome.error,
                "delivery attempt failed"
            );
        }

        sink.notify(Notification::Result(ResultNotice {
            destination: destination.id.clone(),
            outcome: outcome.clone(),
        }))
        .await;

        DeliveryAttempt { outcome, masked_payload }
    }

    async fn post_payload(
        &self,
        payload: &Value,
        destination: &DestinationConfig,
        attempted_at: DateTime<Utc>,
    ) -> Outcome {
        let response = self
            .client
            .post(&destination.endpoint_url)
            .timeout(destination.http_timeout)
            .json(payload)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("request timed out after {}s", destination.http_timeout.as_secs())
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    e.to_string()
                };
                return Outcome::transport(message, attempted_at);
            },
        };

        let status = response.status().as_u16();
        let success = response.status().is_success();
        let body = match response.text().await {
            Ok(text) => truncate_response(&text),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        if success {
            Outcome::delivered(status, body, attempted_at)
        } else {
            Outcome::rejected(status, body, attempted_at)
        }
    }
}

/// Builds the ingestion payload for one reading.
///
/// Credentials come from the destination configuration, field values from
/// the reading, and `datapoint_ts` is the sample time in the API's
/// `YYYY-MM-DD HH:MM:SS` format. The unmasked payload never leaves this
/// module; callers only ever see the masked copy.
fn build_payload(reading: &Reading, destination: &DestinationConfig) -> Value {
    let mut map = Map::new();
    map.insert("api_key".to_string(), Value::String(destination.api_key.clone()));
    map.insert("site_fid".to_string(), Value::String(destination.site_id.clone()));

    for (name, value) in &reading.fields {
        map.insert(name.clone(), serde_json::to_value(value).unwrap_or(Value::Null));
    }

    map.insert(
        "datapoint_ts".to_string(),
        Value::String(reading.sampled_at.format(DATAPOINT_TS_FORMAT).to_string()),
    );

    Value::Object(map)
}

/// Truncates a response body for exposure, respecting char boundaries.
fn truncate_response(text: &str) -> String {
    if text.chars().count() <= MAX_RESPONSE_TEXT {
        return text.to_string();
    }
    text.chars().take(MAX_RESPONSE_TEXT).collect()
}
