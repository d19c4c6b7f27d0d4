//! Error types for the delivery engine.
//!
//! Failed delivery attempts are not errors: they are `Outcome` values
//! handled by policy. The variants here cover the conditions that do
//! surface as errors — store I/O, configuration problems, and lifecycle
//! misuse.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for delivery engine operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Persistent state could not be loaded or saved.
    ///
    /// Fatal when raised from destination startup: a destination must not
    /// silently run as if its queue were empty.
    #[error("state store error for destination {destination}: {message}")]
    Store {
        /// Destination whose state was affected.
        destination: String,
        /// Underlying failure description.
        message: String,
    },

    /// Invalid destination or client configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration failure description.
        message: String,
    },

    /// Operation referenced a destination that is not running.
    #[error("unknown destination: {destination}")]
    UnknownDestination {
        /// The destination id that was not found.
        destination: String,
    },

    /// A destination with the same id is already running.
    #[error("destination already started: {destination}")]
    DestinationExists {
        /// The conflicting destination id.
        destination: String,
    },
}

impl DeliveryError {
    /// Creates a store error.
    pub fn store(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store { destination: destination.into(), message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an unknown-destination error.
    pub fn unknown_destination(destination: impl Into<String>) -> Self {
        Self::UnknownDestination { destination: destination.into() }
    }

    /// Creates a destination-exists error.
    pub fn destination_exists(destination: impl Into<String>) -> Self {
        Self::DestinationExists { destination: destination.into() }
    }
}

impl From<gridpost_core::CoreError> for DeliveryError {
    fn from(err: gridpost_core::CoreError) -> Self {
        Self::configuration(err.to_string())
    }
}
