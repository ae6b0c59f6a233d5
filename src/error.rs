//! Error types for the points ledger.
//!
//! [`StoreError`] is what a persistence backend reports. [`LedgerError`] is
//! what callers of the catalog, ledger and leaderboard see.

use thiserror::Error;
use uuid::Uuid;

use crate::models::EntryId;

/// Failure reported by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is busy, locked or timed out. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Backend(e.into()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by catalog, ledger and leaderboard operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("ledger entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("ledger entry already reversed: {0}")]
    AlreadyReversed(EntryId),

    #[error("task is inactive: {0}")]
    InactiveTask(Uuid),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Backend(e) => Self::Store(e),
        }
    }
}

impl LedgerError {
    /// Whether the caller may retry the same call with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Unknown ids and already-reversed entries are both "nothing to act on".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound(_) | Self::EntryNotFound(_) | Self::AlreadyReversed(_)
        )
    }

    /// Stable machine-readable code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::InactiveTask(_) => "INACTIVE_TASK",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(LedgerError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!LedgerError::Validation("short".into()).is_retryable());
        assert!(!LedgerError::InactiveTask(Uuid::nil()).is_retryable());
        assert!(!LedgerError::Store(anyhow::anyhow!("disk")).is_retryable());
    }

    #[test]
    fn already_reversed_counts_as_not_found() {
        assert!(LedgerError::AlreadyReversed(7).is_not_found());
        assert!(LedgerError::EntryNotFound(7).is_not_found());
        assert!(!LedgerError::InactiveTask(Uuid::nil()).is_not_found());
    }

    #[test]
    fn store_unavailable_maps_to_retryable_ledger_error() {
        let err: LedgerError = StoreError::Unavailable("locked".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
    }
}
