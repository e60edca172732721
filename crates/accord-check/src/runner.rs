//! Runs a contract's acceptance criteria against the validator set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use accord_core::{AcceptanceCriterion, Contract, CriterionResult, PartyId, VerificationResult};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::error::CheckError;
use crate::validator::{ValidationContext, ValidatorSet};

/// Executes every criterion of a contract concurrently, each under its own
/// timeout, and assembles a [`VerificationResult`].
///
/// A run never fails as a whole: unknown validator types, validator errors
/// and timeouts all become failing criterion results.
#[derive(Debug, Clone)]
pub struct VerificationRunner {
    validators: Arc<ValidatorSet>,
    environment: BTreeMap<String, String>,
}

impl VerificationRunner {
    pub fn new(validators: ValidatorSet) -> Self {
        VerificationRunner {
            validators: Arc::new(validators),
            environment: BTreeMap::new(),
        }
    }

    /// Adds an environment entry recorded on every result (and hashed into
    /// its cache key).
    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    #[instrument(skip(self, contract), fields(contract_id = %contract.contract_id, version = contract.contract_version))]
    pub async fn run(&self, contract: &Contract, actor: &PartyId) -> VerificationResult {
        let started_at = Utc::now();
        let context = ValidationContext::for_contract(contract, self.environment.clone());

        let checks = contract
            .criteria
            .iter()
            .map(|criterion| self.check(criterion, &context));
        let criteria_results = join_all(checks).await;

        let mut result = VerificationResult::new(
            contract.contract_id.clone(),
            contract.contract_version,
            actor.clone(),
        );
        for criterion in &contract.criteria {
            if let Some(validator) = self.validators.get(&criterion.validator_type) {
                result = result.with_validator_version(
                    validator.validator_type(),
                    validator.version(),
                );
            }
        }
        result.criteria_results = criteria_results;
        result.environment = self.environment.clone();
        result.started_at = started_at;
        result.completed_at = Utc::now();

        debug!(
            passed = result.criteria_results.iter().filter(|r| r.passed).count(),
            total = result.criteria_results.len(),
            "verification run complete"
        );
        result
    }

    async fn check(
        &self,
        criterion: &AcceptanceCriterion,
        context: &ValidationContext,
    ) -> CriterionResult {
        let id = criterion.criterion_id.clone();
        let Some(validator) = self.validators.get(&criterion.validator_type) else {
            let err = CheckError::UnknownValidator {
                validator_type: criterion.validator_type.clone(),
            };
            warn!(criterion_id = %id, error = %err, "criterion cannot be checked");
            return CriterionResult::fail(id, err.to_string());
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(criterion.timeout_seconds),
            validator.validate(criterion, context),
        )
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(mut result)) => {
                result.criterion_id = id;
                if result.duration_ms == 0 {
                    result.duration_ms = elapsed_ms;
                }
                result
            }
            Ok(Err(err)) => {
                warn!(criterion_id = %id, error = %err, "validator returned an error");
                CriterionResult::fail(id, err.to_string()).with_duration_ms(elapsed_ms)
            }
            Err(_) => {
                let err = CheckError::ValidatorTimeout {
                    criterion_id: id.clone(),
                    seconds: criterion.timeout_seconds,
                };
                warn!(criterion_id = %id, error = %err, "validator timed out");
                CriterionResult::timeout(id, criterion.timeout_seconds)
            }
        }
    }
}
