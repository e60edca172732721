//! Registry error type.
//!
//! [`RegistryError`] wraps the error enums of the lower crates transparently,
//! so callers can match on e.g. `RegistryError::Core(CoreError::CycleDetected { .. })`,
//! and adds the failure modes owned by the registry itself.

use accord_check::CheckError;
use accord_core::CoreError;
use accord_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Structural or lifecycle rule violated.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Persistence backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Artifact integrity or validator failure surfaced to the caller.
    #[error(transparent)]
    Check(#[from] CheckError),

    /// A lock could not be acquired within the configured timeout.
    #[error("timed out after {waited_ms}ms waiting for lock on {resource}")]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// The wrapped core error, if any.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            RegistryError::Core(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::Core(err) => err.is_not_found(),
            RegistryError::Storage(StorageError::ContractNotFound(_)) => true,
            _ => false,
        }
    }
}
