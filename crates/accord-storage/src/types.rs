//! Storage-layer record types.

use accord_core::{ContractId, ContractState, Verdict};
use serde::{Deserialize, Serialize};

/// A memoized verification verdict, stored under its verification cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedVerification {
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub verdict: Verdict,
    /// State the verdict drove the contract into.
    pub state: ContractState,
}
