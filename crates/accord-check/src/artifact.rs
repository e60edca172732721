//! Content-addressed artifact storage and integrity checks.
//!
//! Artifacts (reports, screenshots, traces) are referenced from verification
//! results by [`ArtifactRef`]. The digest is the lowercase hex blake3 hash of
//! the artifact bytes, so integrity is checked by rehashing.

use accord_core::ArtifactRef;
use dashmap::DashMap;
use tracing::warn;

use crate::error::CheckError;

/// External storage for verification artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Stores `bytes` and returns a reference to them.
    fn store(&self, bytes: &[u8], role: &str, media_type: &str) -> ArtifactRef;

    /// Raw bytes for a digest, if present.
    fn fetch(&self, digest: &str) -> Option<Vec<u8>>;

    /// True if the stored bytes still match the reference's digest and size.
    fn verify(&self, artifact: &ArtifactRef) -> bool {
        match self.fetch(&artifact.digest) {
            Some(bytes) => {
                bytes.len() as u64 == artifact.size
                    && blake3::hash(&bytes).to_hex().as_str() == artifact.digest
            }
            None => false,
        }
    }
}

/// Concurrent in-memory [`ArtifactStore`] keyed by digest.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn store(&self, bytes: &[u8], role: &str, media_type: &str) -> ArtifactRef {
        let digest = blake3::hash(bytes).to_hex().to_string();
        self.blobs.insert(digest.clone(), bytes.to_vec());
        ArtifactRef {
            path: format!("mem://{digest}"),
            digest,
            size: bytes.len() as u64,
            role: role.to_string(),
            media_type: media_type.to_string(),
        }
    }

    fn fetch(&self, digest: &str) -> Option<Vec<u8>> {
        self.blobs.get(digest).map(|blob| blob.value().clone())
    }
}

/// Checks every reference against `store`.
///
/// Stops at the first artifact that is missing (`ArtifactNotFound`) or whose
/// content no longer matches (`IntegrityViolation`).
pub fn check_artifacts<'a, I>(store: &dyn ArtifactStore, artifacts: I) -> Result<(), CheckError>
where
    I: IntoIterator<Item = &'a ArtifactRef>,
{
    for artifact in artifacts {
        if store.fetch(&artifact.digest).is_none() {
            warn!(digest = %artifact.digest, "referenced artifact is missing");
            return Err(CheckError::ArtifactNotFound {
                digest: artifact.digest.clone(),
            });
        }
        if !store.verify(artifact) {
            warn!(digest = %artifact.digest, "artifact failed integrity check");
            return Err(CheckError::IntegrityViolation {
                digest: artifact.digest.clone(),
                reason: format!(
                    "stored content does not match digest and size {}",
                    artifact.size
                ),
            });
        }
    }
    Ok(())
}
