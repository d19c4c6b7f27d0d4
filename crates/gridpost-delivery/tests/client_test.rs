//! Integration tests for the HTTP transmission client.
//!
//! Exercises outcome mapping (success, rejection, transport failure,
//! timeout), payload construction, and the masked payload/result
//! notifications against a mock HTTP server.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{sync::Mutex, time::Duration};

use chrono::{TimeZone, Utc};
use gridpost_core::{
    events::{Notification, NotificationSink, TriggerReason},
    models::{DestinationConfig, DestinationId, Reading},
};
use gridpost_delivery::{ClientConfig, TransmissionClient};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

#[derive(Debug, Default)]
struct CapturingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl CapturingSink {
    fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().expect("sink lock").clone()
    }
}

#[async_trait::async_trait]
impl NotificationSink for CapturingSink {
    async fn notify(&self, notification: Notification) {
        self.notifications.lock().expect("sink lock").push(notification);
    }
}

fn destination(url: String) -> DestinationConfig {
    let mut config =
        DestinationConfig::new(DestinationId::new("site-a"), url, "supersecretkey", "site-42");
    config.http_timeout = Duration::from_secs(5);
    config
}

fn reading() -> Reading {
    let sampled_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
    Reading::new(DestinationId::new("site-a"), sampled_at)
        .with_field("em_power_grid", 1250_i64)
        .with_field("bat_soc", 87.5_f64)
}

#[tokio::test]
async fn accepted_response_maps_to_successful_outcome() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/api/submit_energy_data"))
        .and(matchers::body_partial_json(serde_json::json!({
            "api_key": "supersecretkey",
            "site_fid": "site-42",
            "em_power_grid": 1250,
            "datapoint_ts": "2026-03-14 09:26:53",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let client = TransmissionClient::with_defaults().unwrap();
    let sink = CapturingSink::default();
    let config = destination(format!("{}/api/submit_energy_data", server.uri()));

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Scheduled, &sink, Utc::now())
        .await;

    assert!(attempt.outcome.success);
    assert_eq!(attempt.outcome.http_status, Some(200));
    assert_eq!(attempt.outcome.response_text.as_deref(), Some("OK"));
    assert!(attempt.outcome.error.is_none());

    server.verify().await;
}

#[tokio::test]
async fn rejected_response_maps_to_failed_outcome_with_status() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown field"))
        .mount(&server)
        .await;

    let client = TransmissionClient::with_defaults().unwrap();
    let sink = CapturingSink::default();
    let config = destination(server.uri());

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Scheduled, &sink, Utc::now())
        .await;

    assert!(!attempt.outcome.success);
    assert_eq!(attempt.outcome.http_status, Some(422));
    assert_eq!(attempt.outcome.error.as_deref(), Some("HTTP 422: unknown field"));
}

#[tokio::test]
async fn server_error_maps_to_failed_outcome() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let client = TransmissionClient::with_defaults().unwrap();
    let sink = CapturingSink::default();
    let config = destination(server.uri());

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Scheduled, &sink, Utc::now())
        .await;

    assert!(!attempt.outcome.success);
    assert_eq!(attempt.outcome.http_status, Some(500));
}

#[tokio::test]
async fn connection_failure_maps_to_transport_outcome_without_status() {
    // nothing listens on this port
    let client = TransmissionClient::with_defaults().unwrap();
    let sink = CapturingSink::default();
    let config = destination("http://127.0.0.1:1/api/submit_energy_data".to_string());

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Manual, &sink, Utc::now())
        .await;

    assert!(!attempt.outcome.success);
    assert_eq!(attempt.outcome.http_status, None);
    assert!(attempt.outcome.error.is_some());
}

#[tokio::test]
async fn stalled_endpoint_times_out_within_bound() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = TransmissionClient::with_defaults().unwrap();
    let sink = CapturingSink::default();
    let mut config = destination(server.uri());
    config.http_timeout = Duration::from_millis(200);

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Scheduled, &sink, Utc::now())
        .await;

    assert!(!attempt.outcome.success);
    assert_eq!(attempt.outcome.http_status, None);
    assert!(attempt.outcome.error.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn notifications_carry_masked_payload_and_outcome() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let client = TransmissionClient::with_defaults().unwrap();
    let sink = CapturingSink::default();
    let config = destination(server.uri());

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Manual, &sink, Utc::now())
        .await;

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 2);

    match &notifications[0] {
        Notification::Payload(notice) => {
            assert_eq!(notice.reason, TriggerReason::Manual);
            // only the last four key characters survive masking
            assert_eq!(notice.payload["api_key"], "**********tkey");
            assert_eq!(notice.payload["site_fid"], "site-42");
        },
        other => panic!("expected payload notification first, got {other:?}"),
    }

    match &notifications[1] {
        Notification::Result(notice) => {
            assert_eq!(notice.outcome, attempt.outcome);
        },
        other => panic!("expected result notification second, got {other:?}"),
    }

    // the masked copy is also returned for diagnostics composition
    assert_eq!(attempt.masked_payload["api_key"], "**********tkey");
}

#[tokio::test]
async fn long_response_bodies_are_truncated() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("y".repeat(2000)))
        .mount(&server)
        .await;

    let client = TransmissionClient::new(&ClientConfig::default()).unwrap();
    let sink = CapturingSink::default();
    let config = destination(server.uri());

    let attempt = client
        .deliver(&reading(), &config, TriggerReason::Scheduled, &sink, Utc::now())
        .await;

    assert_eq!(attempt.outcome.response_text.unwrap().len(), 300);
}
