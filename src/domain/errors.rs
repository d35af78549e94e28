//! Domain errors for the capture reconciliation core.

use thiserror::Error;

/// Domain-level errors that can occur while reconciling capture signals.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Malformed signal: {0}")]
    MalformedSignal(String),

    #[error("Stale signal for attempt {attempt_id}: {reason}")]
    StaleSignal { attempt_id: String, reason: String },

    #[error("Snapshot fetch failed for conversation {conversation_id}: {reason}")]
    FetchFailed { conversation_id: String, reason: String },

    #[error("Engine is not running")]
    EngineStopped,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Shorthand for a fetch failure.
    pub fn fetch_failed(conversation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            conversation_id: conversation_id.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a stale signal.
    pub fn stale(attempt_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StaleSignal {
            attempt_id: attempt_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is expected noise (logged at debug) rather than a fault.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleSignal { .. })
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_helper() {
        let err = DomainError::stale("a1", "attempt superseded");
        assert!(err.is_stale());
        assert_eq!(err.to_string(), "Stale signal for attempt a1: attempt superseded");
    }

    #[test]
    fn test_fetch_failed_message() {
        let err = DomainError::fetch_failed("c1", "HTTP 429");
        assert!(!err.is_stale());
        assert!(err.to_string().contains("c1"));
        assert!(err.to_string().contains("HTTP 429"));
    }

    #[test]
    fn test_from_serde_error() {
        let err: DomainError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, DomainError::SerializationError(_)));
    }
}
