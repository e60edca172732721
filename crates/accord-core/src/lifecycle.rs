//! The contract lifecycle state machine.
//!
//! [`ContractState`] enumerates every lifecycle state and owns the allowed
//! transition table. [`check_transition`] is the guard every mutation passes
//! through before a contract's state changes: it is a pure function over the
//! contract, the requested state and a dependency-satisfaction predicate, so a
//! denied request can never leave a partially mutated contract behind.
//!
//! # Transition kinds
//!
//! Most transitions use the standard table. Four dedicated entry points use
//! extra edges that are deliberately not reachable through a plain
//! `transition` request:
//!
//! - [`TransitionKind::Amendment`]: `* -> AMENDED`, followed in the same
//!   critical section by the standard `AMENDED -> PROPOSED`.
//! - [`TransitionKind::LateBreach`]: `VERIFIED | VERIFIED_WITH_WARNINGS -> BREACHED`.
//! - [`TransitionKind::Reverification`]: a flagged success state may be
//!   verified again.
//! - [`TransitionKind::Retirement`]: soft delete, `* -> REJECTED`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::error::CoreError;
use crate::id::ContractId;

/// Lifecycle state of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractState {
    Draft,
    Proposed,
    Negotiating,
    Accepted,
    InProgress,
    Fulfilled,
    Verified,
    VerifiedWithWarnings,
    Breached,
    Rejected,
    Amended,
}

impl ContractState {
    /// Every state, in declaration order.
    pub const ALL: [ContractState; 11] = [
        ContractState::Draft,
        ContractState::Proposed,
        ContractState::Negotiating,
        ContractState::Accepted,
        ContractState::InProgress,
        ContractState::Fulfilled,
        ContractState::Verified,
        ContractState::VerifiedWithWarnings,
        ContractState::Breached,
        ContractState::Rejected,
        ContractState::Amended,
    ];

    /// Targets reachable through a standard transition request.
    pub fn allowed_targets(self) -> &'static [ContractState] {
        use ContractState::*;
        match self {
            Draft => &[Proposed],
            Proposed => &[Negotiating, Accepted, Draft],
            Negotiating => &[Accepted, Draft],
            Accepted => &[InProgress],
            InProgress => &[Fulfilled, Breached],
            Fulfilled => &[Verified, VerifiedWithWarnings, Breached],
            Verified => &[],
            VerifiedWithWarnings => &[InProgress],
            Breached => &[InProgress],
            Rejected => &[],
            Amended => &[Proposed],
        }
    }

    /// True if `target` is in this state's standard transition table.
    pub fn can_transition_to(self, target: ContractState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// VERIFIED or VERIFIED_WITH_WARNINGS.
    pub fn is_success_terminal(self) -> bool {
        matches!(
            self,
            ContractState::Verified | ContractState::VerifiedWithWarnings
        )
    }

    /// REJECTED: soft-dead, never leaves this state.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, ContractState::Rejected)
    }

    /// ACCEPTED or any later state that is not a terminal failure.
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            ContractState::Accepted
                | ContractState::InProgress
                | ContractState::Fulfilled
                | ContractState::Verified
                | ContractState::VerifiedWithWarnings
                | ContractState::Breached
        )
    }

    /// States whose work may have relied on a dependency's verification.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ContractState::InProgress
                | ContractState::Fulfilled
                | ContractState::Verified
                | ContractState::VerifiedWithWarnings
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractState::Draft => "DRAFT",
            ContractState::Proposed => "PROPOSED",
            ContractState::Negotiating => "NEGOTIATING",
            ContractState::Accepted => "ACCEPTED",
            ContractState::InProgress => "IN_PROGRESS",
            ContractState::Fulfilled => "FULFILLED",
            ContractState::Verified => "VERIFIED",
            ContractState::VerifiedWithWarnings => "VERIFIED_WITH_WARNINGS",
            ContractState::Breached => "BREACHED",
            ContractState::Rejected => "REJECTED",
            ContractState::Amended => "AMENDED",
        }
    }

    /// Parses the SCREAMING_SNAKE_CASE name produced by [`ContractState::as_str`].
    pub fn parse(name: &str) -> Option<ContractState> {
        ContractState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == name)
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edge set a transition request is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Standard,
    Amendment,
    LateBreach,
    Reverification,
    Retirement,
}

/// True if `from -> to` is an edge of the given kind's table.
pub fn is_allowed(from: ContractState, to: ContractState, kind: TransitionKind) -> bool {
    use ContractState::*;
    match kind {
        TransitionKind::Standard => from.can_transition_to(to),
        TransitionKind::Amendment => {
            to == Amended && !matches!(from, Draft | Rejected | Amended)
        }
        TransitionKind::LateBreach => from.is_success_terminal() && to == Breached,
        TransitionKind::Reverification => {
            from.is_success_terminal() && (to.is_success_terminal() || to == Breached)
        }
        TransitionKind::Retirement => from != Rejected && to == Rejected,
    }
}

/// Guard evaluated before any state mutation.
///
/// Checks, in order: (a) the edge exists for `kind`; (b) entering IN_PROGRESS
/// requires every dependency to satisfy `dependency_satisfied`; (c) entering
/// ACCEPTED requires at least one acceptance criterion. Reverification also
/// requires the contract to carry a pending re-verification notice.
///
/// While a re-verification notice is pending, FULFILLED, VERIFIED and
/// VERIFIED_WITH_WARNINGS stay closed until the breached dependency named by
/// the notice is satisfied again.
pub fn check_transition<F>(
    contract: &Contract,
    target: ContractState,
    kind: TransitionKind,
    dependency_satisfied: F,
) -> Result<(), CoreError>
where
    F: Fn(&ContractId) -> bool,
{
    let from = contract.state;
    let deny = || CoreError::InvalidTransition {
        contract_id: contract.contract_id.clone(),
        from,
        to: target,
    };

    if !is_allowed(from, target, kind) {
        return Err(deny());
    }

    if kind == TransitionKind::Reverification && contract.pending_reverification.is_none() {
        return Err(deny());
    }

    if target == ContractState::InProgress {
        let unmet: Vec<ContractId> = contract
            .depends_on
            .iter()
            .filter(|dep| !dependency_satisfied(dep))
            .cloned()
            .collect();
        if !unmet.is_empty() {
            return Err(CoreError::DependencyNotMet {
                contract_id: contract.contract_id.clone(),
                unmet,
            });
        }
    }

    if matches!(
        target,
        ContractState::Fulfilled | ContractState::Verified | ContractState::VerifiedWithWarnings
    ) {
        if let Some(notice) = &contract.pending_reverification {
            if !dependency_satisfied(&notice.cause) {
                return Err(CoreError::DependencyNotMet {
                    contract_id: contract.contract_id.clone(),
                    unmet: vec![notice.cause.clone()],
                });
            }
        }
    }

    if target == ContractState::Accepted && contract.criteria.is_empty() {
        return Err(CoreError::NoAcceptanceCriteria {
            contract_id: contract.contract_id.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Contract, ReverificationNotice};
    use crate::criteria::AcceptanceCriterion;

    fn contract_in(state: ContractState) -> Contract {
        let mut c = Contract::builder("C1", "API_SPECIFICATION", "provider")
            .criterion(AcceptanceCriterion::new("schema", "json-schema"))
            .build();
        c.state = state;
        c
    }

    #[test]
    fn standard_table_matches_lifecycle() {
        use ContractState::*;
        assert!(Draft.can_transition_to(Proposed));
        assert!(Proposed.can_transition_to(Negotiating));
        assert!(Proposed.can_transition_to(Draft));
        assert!(Negotiating.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Breached));
        assert!(Fulfilled.can_transition_to(VerifiedWithWarnings));
        assert!(VerifiedWithWarnings.can_transition_to(InProgress));
        assert!(Breached.can_transition_to(InProgress));
        assert!(Verified.allowed_targets().is_empty());
        assert!(Rejected.allowed_targets().is_empty());
        assert!(!Draft.can_transition_to(Accepted));
        assert!(!Accepted.can_transition_to(Fulfilled));
    }

    #[test]
    fn every_pair_outside_table_is_denied() {
        for from in ContractState::ALL {
            for to in ContractState::ALL {
                let contract = contract_in(from);
                let outcome = check_transition(&contract, to, TransitionKind::Standard, |_| true);
                if from.can_transition_to(to) {
                    assert!(outcome.is_ok(), "{from} -> {to} should be allowed");
                } else {
                    assert!(
                        matches!(outcome, Err(CoreError::InvalidTransition { .. })),
                        "{from} -> {to} should be denied"
                    );
                }
            }
        }
    }

    #[test]
    fn in_progress_requires_satisfied_dependencies() {
        let mut contract = contract_in(ContractState::Accepted);
        contract.depends_on.insert("B".into());
        contract.depends_on.insert("A".into());

        let err = check_transition(
            &contract,
            ContractState::InProgress,
            TransitionKind::Standard,
            |id| id.as_str() == "A",
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::DependencyNotMet {
                contract_id: "C1".into(),
                unmet: vec!["B".into()],
            }
        );

        assert!(check_transition(
            &contract,
            ContractState::InProgress,
            TransitionKind::Standard,
            |_| true
        )
        .is_ok());
    }

    #[test]
    fn accept_requires_criteria() {
        let mut contract = contract_in(ContractState::Proposed);
        contract.criteria.clear();
        let err = check_transition(
            &contract,
            ContractState::Accepted,
            TransitionKind::Standard,
            |_| true,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::NoAcceptanceCriteria { .. }));
    }

    #[test]
    fn late_breach_only_from_success_states() {
        let verified = contract_in(ContractState::Verified);
        assert!(check_transition(
            &verified,
            ContractState::Breached,
            TransitionKind::LateBreach,
            |_| true
        )
        .is_ok());

        let fulfilled = contract_in(ContractState::Fulfilled);
        assert!(check_transition(
            &fulfilled,
            ContractState::Breached,
            TransitionKind::LateBreach,
            |_| true
        )
        .is_err());
    }

    #[test]
    fn reverification_needs_pending_notice() {
        let mut contract = contract_in(ContractState::Verified);
        assert!(check_transition(
            &contract,
            ContractState::Verified,
            TransitionKind::Reverification,
            |_| true
        )
        .is_err());

        contract.pending_reverification = Some(ReverificationNotice {
            cause: "DEP".into(),
            cause_version: 1,
            late: true,
        });
        assert!(check_transition(
            &contract,
            ContractState::VerifiedWithWarnings,
            TransitionKind::Reverification,
            |_| true
        )
        .is_ok());
    }

    #[test]
    fn pending_notice_holds_success_states_until_cause_recovers() {
        let mut contract = contract_in(ContractState::InProgress);
        contract.depends_on.insert("DEP".into());
        contract.pending_reverification = Some(ReverificationNotice {
            cause: "DEP".into(),
            cause_version: 1,
            late: false,
        });

        let err = check_transition(
            &contract,
            ContractState::Fulfilled,
            TransitionKind::Standard,
            |_| false,
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::DependencyNotMet {
                contract_id: "C1".into(),
                unmet: vec!["DEP".into()],
            }
        );
        // Failing is still possible.
        assert!(check_transition(
            &contract,
            ContractState::Breached,
            TransitionKind::Standard,
            |_| false
        )
        .is_ok());
        assert!(check_transition(
            &contract,
            ContractState::Fulfilled,
            TransitionKind::Standard,
            |_| true
        )
        .is_ok());

        contract.state = ContractState::Verified;
        assert!(matches!(
            check_transition(
                &contract,
                ContractState::Verified,
                TransitionKind::Reverification,
                |_| false
            ),
            Err(CoreError::DependencyNotMet { .. })
        ));
    }

    #[test]
    fn amendment_and_retirement_edges() {
        use ContractState::*;
        assert!(is_allowed(Verified, Amended, TransitionKind::Amendment));
        assert!(!is_allowed(Draft, Amended, TransitionKind::Amendment));
        assert!(!is_allowed(Rejected, Amended, TransitionKind::Amendment));
        assert!(is_allowed(Verified, Rejected, TransitionKind::Retirement));
        assert!(!is_allowed(Rejected, Rejected, TransitionKind::Retirement));
    }

    #[test]
    fn state_names_round_trip() {
        for state in ContractState::ALL {
            assert_eq!(ContractState::parse(state.as_str()), Some(state));
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert_eq!(ContractState::parse("bogus"), None);
    }
}
