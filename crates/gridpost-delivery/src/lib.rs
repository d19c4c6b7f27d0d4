//! Durable delivery engine for gridpost telemetry.
//!
//! Implements the reliability core: a bounded persistent queue per
//! destination, a per-destination scheduler with periodic and on-demand
//! triggers, an HTTP transmission client with payload masking, a
//! deterministic backoff controller, and a repair manager keeping exactly
//! one self-clearing outage issue per destination.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌───────────────────┐   ┌─────────────────────┐
//! │ DeliveryEngine │──▶│ DestinationWorker │──▶│ TransmissionClient  │
//! └────────────────┘   │  (one per dest.)  │   └─────────────────────┘
//!        │             └───────────────────┘              │
//!        ▼                   │        │                   ▼
//! ┌───────────────┐          ▼        ▼          ┌─────────────────┐
//! │ StateStore    │   ┌────────────┐ ┌─────────┐ │ Ingestion API   │
//! │ (JSON files)  │   │ DurableQueue│ │ Backoff │ └─────────────────┘
//! └───────────────┘   └────────────┘ └─────────┘
//!                           │
//!                           ▼
//!               ┌─────────────────────────┐
//!               │ RepairManager / Status  │
//!               └─────────────────────────┘
//! ```
//!
//! Failures are data: an unreachable or rejecting endpoint produces an
//! `Outcome`, keeps the reading queued, and advances the outage state.
//! Only persistent-store I/O at destination startup is fatal.

pub mod backoff;
pub mod client;
pub mod engine;
pub mod error;
pub mod queue;
pub mod repair;
mod scheduler;
pub mod status;
pub mod store;

pub use backoff::{apply_outcome, BackoffPolicy};
pub use client::{ClientConfig, TransmissionClient};
pub use engine::{DeliveryEngine, EngineConfig};
pub use error::{DeliveryError, Result};
pub use queue::DurableQueue;
pub use repair::{IssueDetails, IssueSink, RepairManager, TracingIssueSink};
pub use status::StatusAggregator;
pub use store::{JsonFileStore, PersistedState, StateStore};
