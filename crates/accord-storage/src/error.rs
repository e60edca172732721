//! Storage error types for accord-storage.
//!
//! [`StorageError`] covers the failure modes of the persistence layer:
//! SQLite and migration failures, serialization, missing contracts, event log
//! integrity violations, and reconstruction failures.

use accord_core::ContractId;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No contract record with the given ID.
    #[error("contract not found: {0}")]
    ContractNotFound(ContractId),

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// A stored row could not be turned back into a domain value.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}
