//! Core domain types for the gridpost telemetry forwarder.
//!
//! This crate defines the data model shared across the workspace: telemetry
//! readings, destination configuration, outage bookkeeping, the diagnostic
//! notification system, secret masking, and the clock abstraction. The
//! delivery engine itself lives in `gridpost-delivery`.

pub mod error;
pub mod events;
pub mod mask;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{
    CombinedNotice, MulticastSink, NoOpSink, Notification, NotificationSink, PayloadNotice,
    ResultNotice, TracingSink, TriggerReason,
};
pub use models::{
    DestinationConfig, DestinationId, FieldValue, Outcome, OutageState, QueueEntry, Reading,
    StatusSnapshot,
};
pub use time::{Clock, RealClock, TestClock};
