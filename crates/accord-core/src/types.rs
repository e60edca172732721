//! Small value types shared across the contract model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduling priority of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Reference to an artifact held by an external artifact store.
///
/// The registry only carries these values; it never touches artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Hex-encoded content digest.
    pub digest: String,
    /// Size in bytes.
    pub size: u64,
    /// Store-specific location.
    pub path: String,
    /// What the artifact is evidence of (e.g. "screenshot", "report").
    pub role: String,
    pub media_type: String,
}
