//! Recording verification results against contracts.

use chrono::Utc;
use tracing::{debug, info, warn};

use accord_check::{check_artifacts, evaluate, VerdictSummary, VerificationRunner};
use accord_core::{
    check_transition, Contract, ContractId, ContractState, CoreError, EventKind, PartyId,
    TransitionKind, Verdict, VerificationResult,
};
use accord_storage::{verification_cache_key, CacheKey, CachedVerification};

use crate::error::RegistryError;
use crate::registry::ContractRegistry;
use crate::transitions::BreachReport;

/// What a call to [`ContractRegistry::verify`] did.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    /// The contract after the verdict was applied.
    pub contract: Contract,
    pub summary: VerdictSummary,
    /// Key the verdict was memoized under.
    pub cache_key: CacheKey,
    /// Verdict previously stored under the same key, if any.
    pub previous_verdict: Option<Verdict>,
    /// Present when the verdict was FAIL.
    pub breach: Option<BreachReport>,
}

impl VerificationOutcome {
    pub fn verdict(&self) -> Verdict {
        self.summary.verdict
    }

    pub fn state(&self) -> ContractState {
        self.contract.state
    }
}

fn breach_reason(summary: &VerdictSummary) -> String {
    let failed: Vec<&str> = summary
        .failed_required
        .iter()
        .chain(&summary.missing_required)
        .map(|id| id.as_str())
        .collect();
    format!("required criteria failed: {}", failed.join(", "))
}

impl ContractRegistry {
    /// Applies a verification result to a FULFILLED contract, or to a
    /// verified contract flagged for re-verification.
    ///
    /// The result must target the contract's current version. If an artifact
    /// store is configured, every referenced artifact must pass its integrity
    /// check before anything changes. The verdict moves the contract to
    /// VERIFIED, VERIFIED_WITH_WARNINGS or BREACHED; a FAIL then propagates
    /// to dependents like any other breach. While a re-verification notice is
    /// pending, a passing verdict is refused with `DependencyNotMet` until the
    /// breached dependency has been verified again.
    pub async fn verify(
        &self,
        id: &ContractId,
        result: VerificationResult,
    ) -> Result<VerificationOutcome, RegistryError> {
        if &result.contract_id != id {
            return Err(CoreError::InvalidVerification {
                contract_id: id.clone(),
                reason: format!("result was produced for {}", result.contract_id),
            }
            .into());
        }
        let actor = result.verified_by.clone();

        let (contract, summary, cache_key, previous_verdict, late) = {
            let _guard = self.locks.lock_contract(id).await?;
            let mut contract = self.snapshot(id)?;
            let from = contract.state;

            let kind = if from.is_success_terminal() && contract.pending_reverification.is_some()
            {
                TransitionKind::Reverification
            } else {
                TransitionKind::Standard
            };
            if kind == TransitionKind::Standard && from != ContractState::Fulfilled {
                return Err(CoreError::InvalidTransition {
                    contract_id: id.clone(),
                    from,
                    to: ContractState::Verified,
                }
                .into());
            }

            if result.contract_version != contract.contract_version {
                return Err(CoreError::StaleVerification {
                    contract_id: id.clone(),
                    result_version: result.contract_version,
                    current_version: contract.contract_version,
                }
                .into());
            }

            if let Some(artifacts) = &self.artifacts {
                check_artifacts(artifacts.as_ref(), result.all_artifacts())?;
            }

            let summary = evaluate(&contract.criteria, &result.criteria_results);
            let target = summary.verdict.target_state();
            check_transition(&contract, target, kind, |dep| self.dependency_satisfied(dep))?;

            let cache_key = verification_cache_key(&contract, &result);
            let previous = self
                .store
                .lock()
                .await
                .get_cached_verification(&cache_key)?;
            match &previous {
                Some(cached) if cached.verdict == summary.verdict => {
                    debug!(contract_id = %id, key = %cache_key, "verdict matches cached verdict");
                }
                Some(cached) => warn!(
                    contract_id = %id,
                    key = %cache_key,
                    cached = ?cached.verdict,
                    verdict = ?summary.verdict,
                    "verdict differs from cached verdict for the same inputs"
                ),
                None => {}
            }

            let late = from.is_success_terminal();
            if summary.verdict != Verdict::Fail {
                contract.dependency_versions = self.current_versions(&contract.depends_on);
            }
            contract.pending_reverification = None;
            let result_id = result.result_id;
            contract.last_verification = Some(result);

            let event = match summary.verdict {
                Verdict::Fail => EventKind::Breached {
                    reason: breach_reason(&summary),
                    late,
                },
                verdict => EventKind::Verified {
                    verdict,
                    state: target,
                    cache_key: cache_key.to_hex(),
                    result_id,
                },
            };
            contract.state = event.resulting_state(from);
            contract.timestamps.record(contract.state, Utc::now());
            let contract = self.commit(contract, &actor, event).await?;

            // Memoized only once the verdict is part of the contract's history.
            let cached = CachedVerification {
                contract_id: id.clone(),
                contract_version: contract.contract_version,
                verdict: summary.verdict,
                state: target,
            };
            if let Err(err) = self
                .store
                .lock()
                .await
                .put_cached_verification(&cache_key, &cached)
            {
                warn!(
                    contract_id = %id,
                    key = %cache_key,
                    error = %err,
                    "failed to memoize verdict"
                );
            }

            info!(
                contract_id = %id,
                version = contract.contract_version,
                verdict = ?summary.verdict,
                from = %from,
                to = %contract.state,
                actor = %actor,
                "verification recorded"
            );
            (contract, summary, cache_key, previous.map(|c| c.verdict), late)
        };

        let breach = if summary.verdict == Verdict::Fail {
            Some(self.cascade(&contract, late, &actor).await?)
        } else {
            None
        };

        Ok(VerificationOutcome {
            contract: self.with_enables(contract),
            summary,
            cache_key,
            previous_verdict,
            breach,
        })
    }

    /// Runs the contract's criteria through `runner` and records the result.
    ///
    /// Validators run without any registry lock held. If the contract is
    /// amended meanwhile, recording fails with `StaleVerification`.
    pub async fn run_verification(
        &self,
        id: &ContractId,
        runner: &VerificationRunner,
        actor: &PartyId,
    ) -> Result<VerificationOutcome, RegistryError> {
        let contract = self.snapshot(id)?;
        let result = runner.run(&contract, actor).await;
        self.verify(id, result).await
    }
}
