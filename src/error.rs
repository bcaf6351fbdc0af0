//! Error taxonomy for the fact engine.
//!
//! Every public operation returns [`FactError`]. `NotFound` and
//! `ConflictUnresolved` are meant for the user (ask a clarifying question);
//! `ExtractionTimeout` and `PartialBatchFailure` are normally recovered inside
//! the engine and only logged.

use thiserror::Error;

pub type Result<T, E = FactError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FactError {
    /// No canonical fact exists. Callers must ask the user, never guess.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("structured extraction timed out after {elapsed_ms} ms")]
    ExtractionTimeout { elapsed_ms: u64 },

    /// Contradictory high-confidence values are both retained; `current` is the
    /// most recent statement.
    #[error("unresolved conflict for {subject}: current value {current:?}, {pending} pending review")]
    ConflictUnresolved {
        subject: String,
        current: String,
        pending: usize,
    },

    #[error("{failed} of {total} messages in batch could not be processed")]
    PartialBatchFailure { failed: usize, total: usize },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FactError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the error should be surfaced to the user as a clarifying question.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ConflictUnresolved { .. })
    }
}

impl From<tokio::task::JoinError> for FactError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_kinds() {
        assert!(FactError::not_found("user name").is_user_visible());
        assert!(FactError::ConflictUnresolved {
            subject: "birthday".into(),
            current: "May 3".into(),
            pending: 1,
        }
        .is_user_visible());
        assert!(!FactError::ExtractionTimeout { elapsed_ms: 3000 }.is_user_visible());
        assert!(!FactError::PartialBatchFailure { failed: 1, total: 5 }.is_user_visible());
    }

    #[test]
    fn storage_errors_convert() {
        let err: FactError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, FactError::Storage(_)));
    }
}
