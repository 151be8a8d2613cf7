// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy surfaced by the router, status service and syncer.

use thiserror::Error;

use crate::storage::traits::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("resource not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    /// Mutations are blocked while a migration is running. Clients may retry with backoff.
    #[error("system is migrating: {resource_type} is temporarily unavailable for writes")]
    TemporarilyUnavailable { resource_type: String },
    /// The caller presented a stale update key and must re-fetch the status.
    #[error("update key mismatch: expected {expected}, stored {actual}")]
    KeyMismatch { expected: i64, actual: i64 },
    #[error("resource type '{0}' is already migrated")]
    AlreadyMigrated(String),
    #[error("migration of '{0}' is already in progress")]
    MigrationInProgress(String),
    #[error("invalid: {0}")]
    Invalid(String),
    /// A reconciliation pass refuses to work from a partial listing.
    #[error("{store} store holds more than {max} items")]
    ListLimitExceeded { store: String, max: usize },
    #[error("operation timed out")]
    Timeout,
    #[error("storage backend error: {0}")]
    Generic(String),
}

impl MigrationError {
    /// Whether retrying the same request later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TemporarilyUnavailable { .. }
                | Self::MigrationInProgress(_)
                | Self::Timeout
                | Self::Generic(_)
        )
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::TemporarilyUnavailable { .. } => "migrating",
            Self::KeyMismatch { .. } => "key_mismatch",
            Self::AlreadyMigrated(_) => "already_migrated",
            Self::MigrationInProgress(_) => "in_progress",
            Self::Invalid(_) => "invalid",
            Self::ListLimitExceeded { .. } => "list_limit",
            Self::Timeout => "timeout",
            Self::Generic(_) => "generic",
        }
    }
}

impl From<StorageError> for MigrationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound,
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::Invalid(msg) => Self::Invalid(msg),
            StorageError::Backend(msg) => Self::Generic(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        assert_eq!(MigrationError::from(StorageError::NotFound), MigrationError::NotFound);
        assert_eq!(
            MigrationError::from(StorageError::Backend("boom".into())),
            MigrationError::Generic("boom".into())
        );
        assert!(matches!(
            MigrationError::from(StorageError::Conflict("rv".into())),
            MigrationError::Conflict(_)
        ));
    }

    #[test]
    fn test_migrating_is_retryable_and_distinct() {
        let err = MigrationError::TemporarilyUnavailable { resource_type: "folders".into() };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "migrating");
        assert!(err.to_string().contains("migrating"));

        assert!(!MigrationError::Invalid("x".into()).is_retryable());
        assert!(!MigrationError::KeyMismatch { expected: 1, actual: 2 }.is_retryable());
    }
}
