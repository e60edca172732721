//! Error types for verification and artifact checks.

use accord_core::CriterionId;
use thiserror::Error;

/// Errors produced by validators, the validator set and artifact stores.
///
/// Inside a verification run most of these become failing criterion results
/// rather than being returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("validator for criterion {criterion_id} timed out after {seconds}s")]
    ValidatorTimeout {
        criterion_id: CriterionId,
        seconds: u64,
    },

    #[error("no validator registered for type '{validator_type}'")]
    UnknownValidator { validator_type: String },

    #[error("validator type '{validator_type}' registered twice")]
    DuplicateValidator { validator_type: String },

    #[error("validator failed on criterion {criterion_id}: {reason}")]
    ValidatorFailed {
        criterion_id: CriterionId,
        reason: String,
    },

    #[error("artifact {digest} failed integrity check: {reason}")]
    IntegrityViolation { digest: String, reason: String },

    #[error("artifact not found: {digest}")]
    ArtifactNotFound { digest: String },
}
