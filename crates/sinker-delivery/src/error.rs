//! Error types for webhook delivery operations.
//!
//! Delivery treats any HTTP response as a completed attempt, so the only
//! transport-level failures are connection problems and timeouts. The
//! remaining variants cover storage propagation, manual-retry rejections,
//! and shutdown overruns.

use sinker_core::{CoreError, EventId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised by the delivery engine.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Storage or model failure bubbled up from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Network-level connectivity failure.
    #[error("network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds the client waited before giving up.
        timeout_seconds: u64,
    },

    /// HTTP client could not be constructed from its configuration.
    #[error("invalid client configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },

    /// Manual retry requested for an event that already delivered.
    #[error("event {id} already delivered successfully")]
    AlreadyDelivered {
        /// Identifier of the delivered event.
        id: EventId,
    },

    /// Manual retry requested for an event with no attempt budget left.
    #[error("event {id} exhausted its retries ({attempts}/{max_attempts})")]
    RetriesExhausted {
        /// Identifier of the exhausted event.
        id: EventId,
        /// Attempts already consumed.
        attempts: i32,
        /// Attempt budget the event was created with.
        max_attempts: i32,
    },

    /// Graceful shutdown did not finish within its deadline.
    #[error("shutdown timed out after {timeout_seconds}s")]
    ShutdownTimeout {
        /// Seconds the engine waited for workers to drain.
        timeout_seconds: u64,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// True when the failure happened on the wire rather than in our own
    /// machinery. Transport failures consume an attempt; everything else
    /// is reported to the caller instead.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_distinguished_from_rejections() {
        assert!(DeliveryError::network("connection refused").is_transport());
        assert!(DeliveryError::timeout(30).is_transport());

        let id = EventId::new();
        assert!(!DeliveryError::AlreadyDelivered { id }.is_transport());
        assert!(
            !DeliveryError::RetriesExhausted { id, attempts: 3, max_attempts: 3 }.is_transport()
        );
        assert!(!DeliveryError::configuration("bad redirect policy").is_transport());
    }

    #[test]
    fn core_errors_convert_transparently() {
        let core = CoreError::not_found("event 42");
        let delivery = DeliveryError::from(core);
        assert_eq!(delivery.to_string(), "not found: event 42");
    }

    #[test]
    fn display_formats_carry_context() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");

        let id = EventId::new();
        let exhausted = DeliveryError::RetriesExhausted { id, attempts: 3, max_attempts: 3 };
        assert_eq!(exhausted.to_string(), format!("event {id} exhausted its retries (3/3)"));
    }
}
