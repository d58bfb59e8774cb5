//! Error types and result handling for core operations.
//!
//! Covers the persistence-facing taxonomy: validation rejections, missing
//! rows, uniqueness conflicts, and database failures. Delivery-time errors
//! (timeouts, refused connections) live in the delivery crate, recorded on
//! events rather than surfaced to callers.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for model validation and storage operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violated (duplicate subscription URL and friends).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller-supplied input rejected before any state change.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Builds a [`CoreError::NotFound`] naming the missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Builds a [`CoreError::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Builds a [`CoreError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True for rejections caused by the caller's input or target id, as
    /// opposed to infrastructure failures.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Conflict(_) | Self::InvalidInput(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::InvalidInput(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_distinguished_from_infrastructure_failures() {
        assert!(CoreError::not_found("event 42").is_rejection());
        assert!(CoreError::conflict("url taken").is_rejection());
        assert!(CoreError::invalid_input("empty url").is_rejection());
        assert!(!CoreError::Database("connection reset".to_string()).is_rejection());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
