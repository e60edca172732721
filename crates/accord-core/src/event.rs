//! Contract events: the append-only audit trail of every contract.
//!
//! Each accepted mutation appends exactly one [`ContractEvent`] to the
//! contract's log (a breaking amendment appends one `Amended` event that
//! records both the transient AMENDED state and the resulting state). Events
//! are never rewritten or removed, and every kind reports the state it leaves
//! the contract in, so [`replay`] can reconstruct the current state from the
//! log alone.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::Verdict;
use crate::error::CoreError;
use crate::id::{ContractId, EventId, PartyId};
use crate::lifecycle::ContractState;

/// Kind-specific payload of a contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The contract was registered in DRAFT.
    Registered,
    Proposed,
    Negotiating,
    /// Sent back from PROPOSED or NEGOTIATING to DRAFT.
    Withdrawn,
    Accepted { criteria_count: usize },
    /// Entered IN_PROGRESS against these dependency versions.
    Started {
        dependency_versions: BTreeMap<ContractId, u32>,
    },
    Fulfilled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Verified {
        verdict: Verdict,
        state: ContractState,
        /// Hex verification cache key the verdict is memoized under.
        cache_key: String,
        result_id: uuid::Uuid,
    },
    Breached {
        reason: String,
        /// Raised after an earlier successful verification.
        late: bool,
    },
    Amended {
        previous_version: u32,
        new_version: u32,
        breaking: bool,
        dependencies_changed: bool,
        previous_state: ContractState,
        resulting_state: ContractState,
        #[serde(default)]
        summary: String,
    },
    /// Non-versioned edit of descriptive fields.
    Clarified { fields: Vec<String> },
    Rejected { reason: String },
    /// A dependency this contract relied on was breached.
    ReverificationRequired {
        cause: ContractId,
        cause_version: u32,
        late: bool,
        state: ContractState,
    },
}

impl EventKind {
    /// The state the contract is in after this event is applied.
    ///
    /// `current` is needed for kinds that do not change state.
    pub fn resulting_state(&self, current: ContractState) -> ContractState {
        match self {
            EventKind::Registered => ContractState::Draft,
            EventKind::Proposed => ContractState::Proposed,
            EventKind::Negotiating => ContractState::Negotiating,
            EventKind::Withdrawn => ContractState::Draft,
            EventKind::Accepted { .. } => ContractState::Accepted,
            EventKind::Started { .. } => ContractState::InProgress,
            EventKind::Fulfilled { .. } => ContractState::Fulfilled,
            EventKind::Verified { state, .. } => *state,
            EventKind::Breached { .. } => ContractState::Breached,
            EventKind::Amended {
                resulting_state, ..
            } => *resulting_state,
            EventKind::Clarified { .. } => current,
            EventKind::Rejected { .. } => ContractState::Rejected,
            EventKind::ReverificationRequired { state, .. } => *state,
        }
    }

    /// Short snake_case label, used for storage columns and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Registered => "registered",
            EventKind::Proposed => "proposed",
            EventKind::Negotiating => "negotiating",
            EventKind::Withdrawn => "withdrawn",
            EventKind::Accepted { .. } => "accepted",
            EventKind::Started { .. } => "started",
            EventKind::Fulfilled { .. } => "fulfilled",
            EventKind::Verified { .. } => "verified",
            EventKind::Breached { .. } => "breached",
            EventKind::Amended { .. } => "amended",
            EventKind::Clarified { .. } => "clarified",
            EventKind::Rejected { .. } => "rejected",
            EventKind::ReverificationRequired { .. } => "reverification_required",
        }
    }
}

/// One entry of a contract's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEvent {
    pub event_id: EventId,
    pub contract_id: ContractId,
    /// 1-based position in the contract's log.
    pub sequence: u64,
    /// Contract version after the event was applied.
    pub contract_version: u32,
    /// The acting party.
    pub actor: PartyId,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
}

impl ContractEvent {
    pub fn new(
        contract_id: ContractId,
        sequence: u64,
        contract_version: u32,
        actor: PartyId,
        kind: EventKind,
    ) -> Self {
        ContractEvent {
            event_id: EventId::new(),
            contract_id,
            sequence,
            contract_version,
            actor,
            occurred_at: Utc::now(),
            kind,
        }
    }
}

/// Reconstructs a contract's state by folding its event log from DRAFT.
///
/// Fails if the log belongs to more than one contract or its sequence numbers
/// are not contiguous from 1.
pub fn replay(events: &[ContractEvent]) -> Result<ContractState, CoreError> {
    let mut state = ContractState::Draft;
    let Some(first) = events.first() else {
        return Ok(state);
    };

    for (index, event) in events.iter().enumerate() {
        let mismatch = |reason: String| CoreError::ReplayMismatch {
            contract_id: first.contract_id.clone(),
            reason,
        };
        if event.contract_id != first.contract_id {
            return Err(mismatch(format!(
                "event {} belongs to {}",
                event.sequence, event.contract_id
            )));
        }
        let expected = index as u64 + 1;
        if event.sequence != expected {
            return Err(mismatch(format!(
                "expected sequence {expected}, found {}",
                event.sequence
            )));
        }
        state = event.kind.resulting_state(state);
    }
    Ok(state)
}
