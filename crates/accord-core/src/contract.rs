//! The contract record.
//!
//! A [`Contract`] has an immutable identity (`contract_id`) and mutable state.
//! Everything that feeds its cache key (criteria, dependencies, tags,
//! consumers) is held in ordered collections so that two logically equal
//! contracts always serialize identically.
//!
//! Contracts are built with [`Contract::builder`] and start in DRAFT. Once
//! registered they change only through the registry's guarded entry points.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::{AcceptanceCriterion, VerificationResult};
use crate::error::CoreError;
use crate::event::ContractEvent;
use crate::id::{ContractId, PartyId};
use crate::lifecycle::ContractState;
use crate::types::Priority;

/// Default structural schema version of newly built contracts.
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// Wall-clock timestamps of the major lifecycle transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleTimestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub proposed_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub breached_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub amended_at: Option<DateTime<Utc>>,
}

impl LifecycleTimestamps {
    /// Stamps the field matching `state`, if it has one.
    pub fn record(&mut self, state: ContractState, at: DateTime<Utc>) {
        let slot = match state {
            ContractState::Draft => return,
            ContractState::Proposed => &mut self.proposed_at,
            ContractState::Negotiating => return,
            ContractState::Accepted => &mut self.accepted_at,
            ContractState::InProgress => &mut self.started_at,
            ContractState::Fulfilled => &mut self.fulfilled_at,
            ContractState::Verified | ContractState::VerifiedWithWarnings => {
                &mut self.verified_at
            }
            ContractState::Breached => &mut self.breached_at,
            ContractState::Rejected => &mut self.rejected_at,
            ContractState::Amended => &mut self.amended_at,
        };
        *slot = Some(at);
    }
}

/// Set on a contract whose earlier verification relied on a dependency that
/// was later breached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverificationNotice {
    /// The breached dependency.
    pub cause: ContractId,
    /// Version of the dependency that was breached.
    pub cause_version: u32,
    /// Raised by a late breach of an already verified dependency.
    pub late: bool,
}

/// A versioned, stateful agreement between a provider and its consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    // Identity
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub schema_version: String,

    // Classification
    pub contract_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,

    // Parties
    pub provider: PartyId,
    #[serde(default)]
    pub consumers: BTreeSet<PartyId>,

    /// Type-specific specification document, carried but never interpreted.
    #[serde(default)]
    pub specification: serde_json::Value,
    #[serde(default)]
    pub criteria: Vec<AcceptanceCriterion>,

    // Dependency edges
    #[serde(default)]
    pub depends_on: BTreeSet<ContractId>,
    /// Inverse of `depends_on`, filled in on read. Not authoritative.
    #[serde(default, skip_serializing)]
    pub enables: BTreeSet<ContractId>,

    // Enforcement
    /// Whether a breach of this contract halts its dependents.
    pub is_blocking: bool,
    #[serde(default)]
    pub priority: Priority,

    // Lifecycle
    pub state: ContractState,
    #[serde(default)]
    pub timestamps: LifecycleTimestamps,
    #[serde(default)]
    pub last_verification: Option<VerificationResult>,
    /// Dependency versions this contract last started or was verified against.
    #[serde(default)]
    pub dependency_versions: BTreeMap<ContractId, u32>,
    #[serde(default)]
    pub pending_reverification: Option<ReverificationNotice>,

    /// Append-only event log. Persisted separately from the record.
    #[serde(default, skip_serializing)]
    pub events: Vec<ContractEvent>,
}

impl Contract {
    pub fn builder(
        contract_id: impl Into<ContractId>,
        contract_type: impl Into<String>,
        provider: impl Into<PartyId>,
    ) -> ContractBuilder {
        ContractBuilder::new(contract_id.into(), contract_type.into(), provider.into())
    }

    /// Dependents halted by a breach of this contract: `enables` when
    /// blocking, otherwise nothing.
    pub fn blocks(&self) -> BTreeSet<ContractId> {
        if self.is_blocking {
            self.enables.clone()
        } else {
            BTreeSet::new()
        }
    }

    /// True if `party` is the provider or one of the consumers.
    pub fn involves(&self, party: &PartyId) -> bool {
        &self.provider == party || self.consumers.contains(party)
    }

    /// Sequence number the next appended event must carry.
    pub fn next_sequence(&self) -> u64 {
        self.events.last().map_or(1, |e| e.sequence + 1)
    }

    /// Structural validation run on registration and amendment.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidContract {
            contract_id: self.contract_id.clone(),
            reason,
        };

        if self.contract_id.as_str().trim().is_empty() {
            return Err(invalid("contract_id must not be empty".to_string()));
        }
        if self.contract_type.trim().is_empty() {
            return Err(invalid("contract_type must not be empty".to_string()));
        }
        if self.provider.as_str().trim().is_empty() {
            return Err(invalid("provider must not be empty".to_string()));
        }
        if self.contract_version == 0 {
            return Err(invalid("contract_version starts at 1".to_string()));
        }
        if self.depends_on.contains(&self.contract_id) {
            return Err(CoreError::CycleDetected {
                path: vec![self.contract_id.clone(), self.contract_id.clone()],
            });
        }

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if criterion.criterion_id.as_str().trim().is_empty() {
                return Err(invalid("criterion_id must not be empty".to_string()));
            }
            if !seen.insert(&criterion.criterion_id) {
                return Err(invalid(format!(
                    "duplicate criterion_id '{}'",
                    criterion.criterion_id
                )));
            }
            if criterion.timeout_seconds == 0 {
                return Err(invalid(format!(
                    "criterion '{}' has a zero timeout",
                    criterion.criterion_id
                )));
            }
        }
        Ok(())
    }
}

/// Builder for DRAFT contracts.
#[derive(Debug, Clone)]
pub struct ContractBuilder {
    contract: Contract,
}

impl ContractBuilder {
    fn new(contract_id: ContractId, contract_type: String, provider: PartyId) -> Self {
        let name = contract_id.to_string();
        ContractBuilder {
            contract: Contract {
                contract_id,
                contract_version: 1,
                schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
                contract_type,
                name,
                description: String::new(),
                tags: BTreeSet::new(),
                provider,
                consumers: BTreeSet::new(),
                specification: serde_json::Value::Null,
                criteria: Vec::new(),
                depends_on: BTreeSet::new(),
                enables: BTreeSet::new(),
                is_blocking: true,
                priority: Priority::default(),
                state: ContractState::Draft,
                timestamps: LifecycleTimestamps::default(),
                last_verification: None,
                dependency_versions: BTreeMap::new(),
                pending_reverification: None,
                events: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.contract.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.contract.description = description.into();
        self
    }

    pub fn schema_version(mut self, version: impl Into<String>) -> Self {
        self.contract.schema_version = version.into();
        self
    }

    pub fn consumer(mut self, party: impl Into<PartyId>) -> Self {
        self.contract.consumers.insert(party.into());
        self
    }

    pub fn specification(mut self, specification: serde_json::Value) -> Self {
        self.contract.specification = specification;
        self
    }

    pub fn criterion(mut self, criterion: AcceptanceCriterion) -> Self {
        self.contract.criteria.push(criterion);
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<ContractId>) -> Self {
        self.contract.depends_on.insert(dependency.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.contract.tags.insert(tag.into());
        self
    }

    pub fn blocking(mut self, is_blocking: bool) -> Self {
        self.contract.is_blocking = is_blocking;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.contract.priority = priority;
        self
    }

    pub fn build(self) -> Contract {
        self.contract
    }
}
