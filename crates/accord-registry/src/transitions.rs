//! Lifecycle transitions, amendments and breach propagation.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use accord_core::lifecycle::is_allowed;
use accord_core::{
    check_transition, AcceptanceCriterion, Contract, ContractId, ContractState, CoreError,
    EventKind, PartyId, ReverificationNotice, TransitionKind,
};

use crate::error::RegistryError;
use crate::registry::ContractRegistry;

/// Outcome of a breach: which dependents were flagged for re-verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreachReport {
    pub contract_id: ContractId,
    /// Version of the breached contract.
    pub contract_version: u32,
    pub blocking: bool,
    /// The contract had been verified before it was breached.
    pub late: bool,
    /// Dependents that relied on the breached version and now carry a
    /// re-verification notice.
    pub flagged: Vec<ContractId>,
    /// Dependents left alone: not active, or built against another version.
    pub skipped: Vec<ContractId>,
    /// Dependents of a non-blocking contract, warned but not flagged.
    pub warned: Vec<ContractId>,
}

impl BreachReport {
    fn new(contract: &Contract, late: bool) -> Self {
        BreachReport {
            contract_id: contract.contract_id.clone(),
            contract_version: contract.contract_version,
            blocking: contract.is_blocking,
            late,
            flagged: Vec::new(),
            skipped: Vec::new(),
            warned: Vec::new(),
        }
    }
}

/// A versioned change to a contract's terms.
///
/// Every amendment bumps `contract_version`. A breaking amendment also sends
/// a contract that has left DRAFT back to PROPOSED for renegotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Amendment {
    pub summary: String,
    pub breaking: bool,
    pub specification: Option<Value>,
    pub criteria: Option<Vec<AcceptanceCriterion>>,
    pub depends_on: Option<BTreeSet<ContractId>>,
    pub schema_version: Option<String>,
}

impl Amendment {
    pub fn breaking(summary: impl Into<String>) -> Self {
        Amendment {
            summary: summary.into(),
            breaking: true,
            specification: None,
            criteria: None,
            depends_on: None,
            schema_version: None,
        }
    }

    pub fn non_breaking(summary: impl Into<String>) -> Self {
        Amendment {
            breaking: false,
            ..Amendment::breaking(summary)
        }
    }

    pub fn with_specification(mut self, specification: Value) -> Self {
        self.specification = Some(specification);
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<AcceptanceCriterion>) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn with_dependencies<I, C>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ContractId>,
    {
        self.depends_on = Some(dependencies.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = Some(schema_version.into());
        self
    }
}

impl ContractRegistry {
    /// Runs one guarded state change under the contract's lock.
    ///
    /// `mutate` adjusts the snapshot and returns the event to append; the new
    /// state is the one that event leads to. Nothing is mutated if the guard
    /// denies the transition or persistence fails.
    pub(crate) async fn guarded<F>(
        &self,
        id: &ContractId,
        actor: &PartyId,
        target: ContractState,
        kind: TransitionKind,
        mutate: F,
    ) -> Result<Contract, RegistryError>
    where
        F: FnOnce(&mut Contract) -> EventKind + Send,
    {
        let _guard = self.locks.lock_contract(id).await?;
        let mut contract = self.snapshot(id)?;
        check_transition(&contract, target, kind, |dep| self.dependency_satisfied(dep))?;

        let from = contract.state;
        let event = mutate(&mut contract);
        contract.state = event.resulting_state(from);
        contract.timestamps.record(contract.state, Utc::now());
        let contract = self.commit(contract, actor, event).await?;

        info!(
            contract_id = %id,
            from = %from,
            to = %contract.state,
            actor = %actor,
            "contract transitioned"
        );
        Ok(contract)
    }

    /// DRAFT -> PROPOSED.
    pub async fn propose(&self, id: &ContractId, actor: &PartyId) -> Result<Contract, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Proposed, TransitionKind::Standard, |_| {
                EventKind::Proposed
            })
            .await?;
        Ok(self.with_enables(contract))
    }

    /// PROPOSED -> NEGOTIATING.
    pub async fn negotiate(
        &self,
        id: &ContractId,
        actor: &PartyId,
    ) -> Result<Contract, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Negotiating, TransitionKind::Standard, |_| {
                EventKind::Negotiating
            })
            .await?;
        Ok(self.with_enables(contract))
    }

    /// PROPOSED | NEGOTIATING -> DRAFT.
    pub async fn withdraw(&self, id: &ContractId, actor: &PartyId) -> Result<Contract, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Draft, TransitionKind::Standard, |_| {
                EventKind::Withdrawn
            })
            .await?;
        Ok(self.with_enables(contract))
    }

    /// PROPOSED | NEGOTIATING -> ACCEPTED. Requires at least one criterion.
    pub async fn accept(&self, id: &ContractId, actor: &PartyId) -> Result<Contract, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Accepted, TransitionKind::Standard, |c| {
                EventKind::Accepted {
                    criteria_count: c.criteria.len(),
                }
            })
            .await?;
        Ok(self.with_enables(contract))
    }

    /// ACCEPTED | BREACHED | VERIFIED_WITH_WARNINGS -> IN_PROGRESS.
    ///
    /// Every dependency must be verified and not flagged for re-verification.
    /// The dependency versions in force are recorded on the contract so a
    /// later breach can tell whether this work relied on them.
    pub async fn start(&self, id: &ContractId, actor: &PartyId) -> Result<Contract, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::InProgress, TransitionKind::Standard, |c| {
                let versions = self.current_versions(&c.depends_on);
                c.dependency_versions = versions.clone();
                EventKind::Started {
                    dependency_versions: versions,
                }
            })
            .await?;
        Ok(self.with_enables(contract))
    }

    /// IN_PROGRESS -> FULFILLED: the provider claims the work is done.
    pub async fn fulfill(
        &self,
        id: &ContractId,
        actor: &PartyId,
        note: Option<String>,
    ) -> Result<Contract, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Fulfilled, TransitionKind::Standard, |_| {
                EventKind::Fulfilled { note }
            })
            .await?;
        Ok(self.with_enables(contract))
    }

    /// Generic transition request, dispatched to the dedicated operation for
    /// `target`.
    ///
    /// VERIFIED and VERIFIED_WITH_WARNINGS are only reachable through
    /// [`verify`](ContractRegistry::verify); REJECTED and AMENDED only through
    /// [`delete`](ContractRegistry::delete) and
    /// [`amend`](ContractRegistry::amend).
    pub async fn transition(
        &self,
        id: &ContractId,
        target: ContractState,
        actor: &PartyId,
    ) -> Result<Contract, RegistryError> {
        let current = self.snapshot(id)?;
        check_transition(&current, target, TransitionKind::Standard, |dep| {
            self.dependency_satisfied(dep)
        })?;

        match target {
            ContractState::Proposed => self.propose(id, actor).await,
            ContractState::Negotiating => self.negotiate(id, actor).await,
            ContractState::Draft => self.withdraw(id, actor).await,
            ContractState::Accepted => self.accept(id, actor).await,
            ContractState::InProgress => self.start(id, actor).await,
            ContractState::Fulfilled => self.fulfill(id, actor, None).await,
            ContractState::Breached => {
                self.breach(id, "breach requested", actor).await?;
                self.get(id)
            }
            ContractState::Verified | ContractState::VerifiedWithWarnings => {
                Err(CoreError::InvalidVerification {
                    contract_id: id.clone(),
                    reason: format!("{target} requires a VerificationResult"),
                }
                .into())
            }
            ContractState::Rejected | ContractState::Amended => Err(CoreError::InvalidTransition {
                contract_id: id.clone(),
                from: current.state,
                to: target,
            }
            .into()),
        }
    }

    /// IN_PROGRESS | FULFILLED -> BREACHED, then propagates to dependents.
    pub async fn breach(
        &self,
        id: &ContractId,
        reason: &str,
        actor: &PartyId,
    ) -> Result<BreachReport, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Breached, TransitionKind::Standard, |c| {
                c.pending_reverification = None;
                EventKind::Breached {
                    reason: reason.to_string(),
                    late: false,
                }
            })
            .await?;
        self.cascade(&contract, false, actor).await
    }

    /// VERIFIED | VERIFIED_WITH_WARNINGS -> BREACHED: a defect found after
    /// acceptance. Dependents that relied on the breached version are always
    /// flagged, whether or not the contract is blocking.
    pub async fn handle_late_breach(
        &self,
        id: &ContractId,
        reason: &str,
        actor: &PartyId,
    ) -> Result<BreachReport, RegistryError> {
        let contract = self
            .guarded(id, actor, ContractState::Breached, TransitionKind::LateBreach, |c| {
                c.pending_reverification = None;
                EventKind::Breached {
                    reason: reason.to_string(),
                    late: true,
                }
            })
            .await?;
        warn!(contract_id = %id, reason, "late breach of verified contract");
        self.cascade(&contract, true, actor).await
    }

    /// Flags dependents after `breached` entered BREACHED.
    ///
    /// Runs after the breached contract's lock is released and takes one
    /// dependent lock at a time. Only dependents in an active state that
    /// recorded the breached version are flagged.
    pub(crate) async fn cascade(
        &self,
        breached: &Contract,
        late: bool,
        actor: &PartyId,
    ) -> Result<BreachReport, RegistryError> {
        let mut report = BreachReport::new(breached, late);
        let dependents: Vec<ContractId> = self
            .read_graph()
            .dependents(&breached.contract_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        if !late && !breached.is_blocking {
            if !dependents.is_empty() {
                warn!(
                    contract_id = %breached.contract_id,
                    dependents = dependents.len(),
                    "non-blocking contract breached, dependents continue"
                );
            }
            report.warned = dependents;
            return Ok(report);
        }

        for dependent_id in dependents {
            let _guard = self.locks.lock_contract(&dependent_id).await?;
            let mut dependent = self.snapshot(&dependent_id)?;

            let relied_on = dependent.dependency_versions.get(&breached.contract_id)
                == Some(&breached.contract_version);
            if !dependent.state.is_active() || !relied_on {
                debug!(
                    contract_id = %dependent_id,
                    state = %dependent.state,
                    relied_on,
                    "dependent not affected by breach"
                );
                report.skipped.push(dependent_id);
                continue;
            }

            let state = dependent.state;
            dependent.pending_reverification = Some(ReverificationNotice {
                cause: breached.contract_id.clone(),
                cause_version: breached.contract_version,
                late,
            });
            self.commit(
                dependent,
                actor,
                EventKind::ReverificationRequired {
                    cause: breached.contract_id.clone(),
                    cause_version: breached.contract_version,
                    late,
                    state,
                },
            )
            .await?;
            warn!(
                contract_id = %dependent_id,
                cause = %breached.contract_id,
                late,
                "re-verification required"
            );
            report.flagged.push(dependent_id);
        }
        Ok(report)
    }

    /// Applies a versioned change to the contract's terms.
    ///
    /// The version always increments. A breaking amendment moves any
    /// non-DRAFT contract through AMENDED to PROPOSED in one step, clearing
    /// its recorded dependency versions and any re-verification notice. New
    /// dependencies must exist, not be REJECTED and keep the graph acyclic.
    /// A non-breaking amendment of work already under way may only add
    /// dependencies that are satisfied now; their versions are recorded as if
    /// they had been in place at start. On any failure neither the contract
    /// nor the graph changes.
    pub async fn amend(
        &self,
        id: &ContractId,
        amendment: Amendment,
        actor: &PartyId,
    ) -> Result<Contract, RegistryError> {
        let Amendment {
            summary,
            breaking,
            specification,
            criteria,
            depends_on,
            schema_version,
        } = amendment;

        let _graph = match depends_on {
            Some(_) => Some(self.locks.write_graph().await?),
            None => None,
        };

        let amended = {
            let _guard = self.locks.lock_contract(id).await?;
            let mut contract = self.snapshot(id)?;
            let previous_state = contract.state;
            if matches!(
                previous_state,
                ContractState::Rejected | ContractState::Amended
            ) {
                return Err(CoreError::InvalidTransition {
                    contract_id: id.clone(),
                    from: previous_state,
                    to: ContractState::Amended,
                }
                .into());
            }

            if let Some(specification) = specification {
                contract.specification = specification;
            }
            if let Some(criteria) = criteria {
                contract.criteria = criteria;
            }
            if let Some(schema_version) = schema_version {
                contract.schema_version = schema_version;
            }

            let mut dependencies_changed = false;
            if let Some(depends_on) = depends_on.filter(|deps| deps != &contract.depends_on) {
                self.check_dependencies(id, &depends_on)?;
                self.read_graph().check_edges(id, &depends_on)?;

                // Active work keeps running only on dependencies it can rely on.
                if !breaking && previous_state.is_active() {
                    let added: BTreeSet<ContractId> = depends_on
                        .difference(&contract.depends_on)
                        .cloned()
                        .collect();
                    let unmet: Vec<ContractId> = added
                        .iter()
                        .filter(|dep| !self.dependency_satisfied(dep))
                        .cloned()
                        .collect();
                    if !unmet.is_empty() {
                        return Err(CoreError::DependencyNotMet {
                            contract_id: id.clone(),
                            unmet,
                        }
                        .into());
                    }
                    contract
                        .dependency_versions
                        .retain(|dep, _| depends_on.contains(dep));
                    contract
                        .dependency_versions
                        .extend(self.current_versions(&added));
                }

                contract.depends_on = depends_on;
                dependencies_changed = true;
            }

            let previous_version = contract.contract_version;
            contract.contract_version = previous_version.checked_add(1).ok_or_else(|| {
                RegistryError::Internal(format!("contract {id} version overflow"))
            })?;
            contract.validate()?;

            let now = Utc::now();
            let resulting_state = if breaking && previous_state != ContractState::Draft {
                if !is_allowed(
                    previous_state,
                    ContractState::Amended,
                    TransitionKind::Amendment,
                ) {
                    return Err(CoreError::InvalidTransition {
                        contract_id: id.clone(),
                        from: previous_state,
                        to: ContractState::Amended,
                    }
                    .into());
                }
                contract.pending_reverification = None;
                contract.dependency_versions.clear();
                contract.timestamps.record(ContractState::Proposed, now);
                ContractState::Proposed
            } else {
                previous_state
            };
            contract.timestamps.record(ContractState::Amended, now);
            contract.state = resulting_state;

            let kind = EventKind::Amended {
                previous_version,
                new_version: contract.contract_version,
                breaking,
                dependencies_changed,
                previous_state,
                resulting_state,
                summary,
            };
            let event = self.persist(&mut contract, actor, kind).await?;
            if dependencies_changed {
                self.write_graph()
                    .replace_dependencies(id, &contract.depends_on)?;
            }
            self.install(contract.clone(), &event);

            info!(
                contract_id = %id,
                version = contract.contract_version,
                breaking,
                from = %previous_state,
                to = %resulting_state,
                "contract amended"
            );
            contract
        };
        Ok(self.with_enables(amended))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_breaking_keeps_fields() {
        let amendment = Amendment::non_breaking("typo")
            .with_schema_version("1.1")
            .with_dependencies(["A", "B"]);
        assert!(!amendment.breaking);
        assert_eq!(amendment.schema_version.as_deref(), Some("1.1"));
        assert_eq!(amendment.depends_on.unwrap().len(), 2);
        assert!(amendment.specification.is_none());
    }
}
