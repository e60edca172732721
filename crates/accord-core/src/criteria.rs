//! Acceptance criteria and the results of checking them.
//!
//! An [`AcceptanceCriterion`] says what must be checked and by which kind of
//! validator. A [`CriterionResult`] is the factual outcome of one check, and a
//! [`VerificationResult`] aggregates every criterion result of one
//! verification attempt together with the validator and environment metadata
//! that make its cache key reproducible.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{ContractId, CriterionId, PartyId};
use crate::lifecycle::ContractState;
use crate::types::ArtifactRef;

/// Default validator timeout when a criterion does not declare one.
pub const DEFAULT_CRITERION_TIMEOUT_SECS: u64 = 30;

/// One independently checkable condition a contract must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub criterion_id: CriterionId,
    #[serde(default)]
    pub description: String,
    /// Tag used to look up the validator implementation.
    pub validator_type: String,
    /// Validator-specific configuration, carried opaquely.
    #[serde(default)]
    pub config: serde_json::Value,
    /// A failing required criterion breaches the contract.
    pub required: bool,
    /// A failing blocking criterion is reported as blocking dependents.
    pub blocking: bool,
    pub timeout_seconds: u64,
}

impl AcceptanceCriterion {
    /// A required, blocking criterion with the default timeout.
    pub fn new(criterion_id: impl Into<CriterionId>, validator_type: impl Into<String>) -> Self {
        AcceptanceCriterion {
            criterion_id: criterion_id.into(),
            description: String::new(),
            validator_type: validator_type.into(),
            config: serde_json::Value::Null,
            required: true,
            blocking: true,
            timeout_seconds: DEFAULT_CRITERION_TIMEOUT_SECS,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Marks the criterion as optional: failing it only produces a warning.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }
}

/// Outcome of checking a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion_id: CriterionId,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub evidence: Vec<ArtifactRef>,
    #[serde(default)]
    pub duration_ms: u64,
    /// The validator did not answer within the criterion's timeout.
    #[serde(default)]
    pub timed_out: bool,
}

impl CriterionResult {
    pub fn pass(criterion_id: impl Into<CriterionId>) -> Self {
        CriterionResult {
            criterion_id: criterion_id.into(),
            passed: true,
            actual: None,
            expected: None,
            message: None,
            evidence: Vec::new(),
            duration_ms: 0,
            timed_out: false,
        }
    }

    pub fn fail(criterion_id: impl Into<CriterionId>, message: impl Into<String>) -> Self {
        CriterionResult {
            passed: false,
            message: Some(message.into()),
            ..CriterionResult::pass(criterion_id)
        }
    }

    /// A failing result recording that the validator exceeded its timeout.
    pub fn timeout(criterion_id: impl Into<CriterionId>, timeout_seconds: u64) -> Self {
        CriterionResult {
            timed_out: true,
            duration_ms: timeout_seconds.saturating_mul(1000),
            ..CriterionResult::fail(
                criterion_id,
                format!("validator timed out after {timeout_seconds}s"),
            )
        }
    }

    pub fn with_values(mut self, actual: serde_json::Value, expected: serde_json::Value) -> Self {
        self.actual = Some(actual);
        self.expected = Some(expected);
        self
    }

    pub fn with_evidence(mut self, artifact: ArtifactRef) -> Self {
        self.evidence.push(artifact);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Aggregate verdict of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Warning,
    Fail,
}

impl Verdict {
    /// The lifecycle state this verdict drives a FULFILLED contract into.
    pub fn target_state(self) -> ContractState {
        match self {
            Verdict::Pass => ContractState::Verified,
            Verdict::Warning => ContractState::VerifiedWithWarnings,
            Verdict::Fail => ContractState::Breached,
        }
    }
}

/// All criterion results for one contract at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub result_id: Uuid,
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub criteria_results: Vec<CriterionResult>,
    /// Validator tag -> validator version.
    #[serde(default)]
    pub validator_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    pub verified_by: PartyId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn new(
        contract_id: impl Into<ContractId>,
        contract_version: u32,
        verified_by: impl Into<PartyId>,
    ) -> Self {
        let now = Utc::now();
        VerificationResult {
            result_id: Uuid::new_v4(),
            contract_id: contract_id.into(),
            contract_version,
            criteria_results: Vec::new(),
            validator_versions: BTreeMap::new(),
            environment: BTreeMap::new(),
            artifacts: Vec::new(),
            verified_by: verified_by.into(),
            started_at: now,
            completed_at: now,
        }
    }

    pub fn with_result(mut self, result: CriterionResult) -> Self {
        self.criteria_results.push(result);
        self
    }

    pub fn with_validator_version(
        mut self,
        validator_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.validator_versions
            .insert(validator_type.into(), version.into());
        self
    }

    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactRef) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Looks up the result for one criterion.
    pub fn result_for(&self, criterion_id: &CriterionId) -> Option<&CriterionResult> {
        self.criteria_results
            .iter()
            .find(|r| &r.criterion_id == criterion_id)
    }

    /// Every artifact reference carried by this result, including per-criterion evidence.
    pub fn all_artifacts(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.artifacts
            .iter()
            .chain(self.criteria_results.iter().flat_map(|r| r.evidence.iter()))
    }
}
