//! Verification for accord contracts.
//!
//! - [`validator`]: the async [`Validator`] plug-in trait and [`ValidatorSet`]
//! - [`runner`]: [`VerificationRunner`], concurrent criterion checks under timeouts
//! - [`verdict`]: [`evaluate`], the PASS / WARNING / FAIL rules
//! - [`artifact`]: [`ArtifactStore`] and integrity checks over result artifacts
//! - [`error`]: CheckError

pub mod artifact;
pub mod error;
pub mod runner;
pub mod validator;
pub mod verdict;

pub use artifact::{check_artifacts, ArtifactStore, InMemoryArtifactStore};
pub use error::CheckError;
pub use runner::VerificationRunner;
pub use validator::{SpecificationValidator, ValidationContext, Validator, ValidatorSet};
pub use verdict::{evaluate, VerdictSummary};
