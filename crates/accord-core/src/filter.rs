//! Contract selection: listing filters and execution-plan scopes.

use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::id::PartyId;
use crate::lifecycle::ContractState;
use crate::types::Priority;

/// Combinable predicates for listing contracts. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractFilter {
    pub contract_type: Option<String>,
    pub state: Option<ContractState>,
    /// Matches the provider or any consumer.
    pub party: Option<PartyId>,
    pub priority: Option<Priority>,
    pub is_blocking: Option<bool>,
    pub tag: Option<String>,
    /// Case-insensitive substring over name and description.
    pub text: Option<String>,
}

impl ContractFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract_type(mut self, contract_type: impl Into<String>) -> Self {
        self.contract_type = Some(contract_type.into());
        self
    }

    pub fn state(mut self, state: ContractState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn party(mut self, party: impl Into<PartyId>) -> Self {
        self.party = Some(party.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn blocking(mut self, is_blocking: bool) -> Self {
        self.is_blocking = Some(is_blocking);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn matches(&self, contract: &Contract) -> bool {
        if let Some(contract_type) = &self.contract_type {
            if &contract.contract_type != contract_type {
                return false;
            }
        }
        if let Some(state) = self.state {
            if contract.state != state {
                return false;
            }
        }
        if let Some(party) = &self.party {
            if !contract.involves(party) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if contract.priority != priority {
                return false;
            }
        }
        if let Some(is_blocking) = self.is_blocking {
            if contract.is_blocking != is_blocking {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !contract.tags.contains(tag) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !contract.name.to_lowercase().contains(&needle)
                && !contract.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Which contracts an execution plan covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    /// Every contract except REJECTED ones.
    #[default]
    Live,
    /// ACCEPTED or later, excluding REJECTED.
    Committed,
}

impl PlanScope {
    pub fn includes(self, state: ContractState) -> bool {
        match self {
            PlanScope::Live => !state.is_terminal_failure(),
            PlanScope::Committed => state.is_committed(),
        }
    }
}
