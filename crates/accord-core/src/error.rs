//! Core error types for accord-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! structural failure modes of the contract model: cycles, invalid or
//! unguarded transitions, missing contracts and blocked deletes.

use thiserror::Error;

use crate::id::ContractId;
use crate::lifecycle::ContractState;

/// Core errors produced by the accord-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Adding the requested dependency edges would close a cycle.
    /// `path` starts and ends with the contract being inserted or amended.
    #[error("dependency cycle detected: {rendered}", rendered = join_ids(.path, " -> "))]
    CycleDetected { path: Vec<ContractId> },

    /// The requested state is not reachable from the current state.
    #[error("invalid transition for {contract_id}: {from} -> {to}")]
    InvalidTransition {
        contract_id: ContractId,
        from: ContractState,
        to: ContractState,
    },

    /// Entering IN_PROGRESS is blocked by dependencies that have not reached a
    /// success state.
    #[error("dependencies not met for {contract_id}: {rendered}", rendered = join_ids(.unmet, ", "))]
    DependencyNotMet {
        contract_id: ContractId,
        unmet: Vec<ContractId>,
    },

    /// No contract is registered under this ID.
    #[error("contract not found: {id}")]
    ContractNotFound { id: ContractId },

    /// Soft delete refused because live contracts still depend on this one.
    #[error("contract {contract_id} still has dependents: {rendered}", rendered = join_ids(.dependents, ", "))]
    HasDependents {
        contract_id: ContractId,
        dependents: Vec<ContractId>,
    },

    /// A contract with this ID is already registered.
    #[error("duplicate contract: {id}")]
    DuplicateContract { id: ContractId },

    /// ACCEPTED requires at least one acceptance criterion.
    #[error("contract {contract_id} has no acceptance criteria")]
    NoAcceptanceCriteria { contract_id: ContractId },

    /// The contract record failed structural validation.
    #[error("invalid contract {contract_id}: {reason}")]
    InvalidContract {
        contract_id: ContractId,
        reason: String,
    },

    /// A rejected contract cannot gain new dependents.
    #[error("contract {contract_id} cannot depend on rejected contract {dependency}")]
    DependencyRejected {
        contract_id: ContractId,
        dependency: ContractId,
    },

    /// A verification result was produced for an older contract version.
    #[error("stale verification for {contract_id}: result targets version {result_version}, current is {current_version}")]
    StaleVerification {
        contract_id: ContractId,
        result_version: u32,
        current_version: u32,
    },

    /// A verification result does not belong to the contract it was reported for.
    #[error("invalid verification for {contract_id}: {reason}")]
    InvalidVerification {
        contract_id: ContractId,
        reason: String,
    },

    /// An internal invariant of the dependency graph was violated.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },

    /// Replaying an event log did not produce a coherent state sequence.
    #[error("event replay mismatch for {contract_id}: {reason}")]
    ReplayMismatch {
        contract_id: ContractId,
        reason: String,
    },
}

impl CoreError {
    /// True for errors that mean "no such contract".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::ContractNotFound { .. })
    }
}

fn join_ids(ids: &[ContractId], separator: &str) -> String {
    ids.iter()
        .map(ContractId::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}
