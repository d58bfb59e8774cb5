//! Error types for bus consumers.

use thiserror::Error;

/// Convenience alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors a message handler can surface.
///
/// Any error returned from a handler suppresses acknowledgment, so the
/// consumer worker redelivers the message after its configured delay.
#[derive(Debug, Error)]
pub enum BusError {
    /// The payload could not be decoded into the expected shape.
    #[error("failed to decode message payload: {0}")]
    Decode(String),

    /// The handler's own processing failed.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl BusError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_lowercase_and_descriptive() {
        let err = BusError::decode("missing field");
        assert_eq!(err.to_string(), "failed to decode message payload: missing field");

        let err = BusError::handler("store unavailable");
        assert_eq!(err.to_string(), "handler failed: store unavailable");
    }
}
