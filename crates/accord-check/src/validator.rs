//! Validator plug-in interface and the tag -> implementation registry.
//!
//! A [`Validator`] checks one acceptance criterion and reports a
//! [`CriterionResult`]. Validators are looked up by the criterion's
//! `validator_type` tag in a [`ValidatorSet`] that is built once at startup
//! and shared read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use accord_core::{AcceptanceCriterion, Contract, ContractId, CriterionResult};
use async_trait::async_trait;

use crate::error::CheckError;

/// What a validator may see of the contract under verification.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub contract_id: ContractId,
    pub contract_version: u32,
    pub contract_type: String,
    pub specification: serde_json::Value,
    /// Environment the verification runs in (region, build id, ...).
    pub environment: BTreeMap<String, String>,
}

impl ValidationContext {
    pub fn for_contract(contract: &Contract, environment: BTreeMap<String, String>) -> Self {
        ValidationContext {
            contract_id: contract.contract_id.clone(),
            contract_version: contract.contract_version,
            contract_type: contract.contract_type.clone(),
            specification: contract.specification.clone(),
            environment,
        }
    }
}

/// A pluggable checker for one kind of acceptance criterion.
///
/// Implementations must be side-effect free with respect to the registry.
/// The runner enforces each criterion's timeout, so `validate` may take as
/// long as it needs.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Tag matched against `AcceptanceCriterion::validator_type`.
    fn validator_type(&self) -> &str;

    /// Version recorded in `VerificationResult::validator_versions`.
    fn version(&self) -> &str;

    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        context: &ValidationContext,
    ) -> Result<CriterionResult, CheckError>;
}

/// Tag -> validator map.
#[derive(Clone, Default)]
pub struct ValidatorSet {
    validators: BTreeMap<String, Arc<dyn Validator>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validator. Each tag may be registered once.
    pub fn register(&mut self, validator: Arc<dyn Validator>) -> Result<(), CheckError> {
        let tag = validator.validator_type().to_string();
        if self.validators.contains_key(&tag) {
            return Err(CheckError::DuplicateValidator {
                validator_type: tag,
            });
        }
        self.validators.insert(tag, validator);
        Ok(())
    }

    /// Builder form of [`ValidatorSet::register`].
    pub fn with(mut self, validator: Arc<dyn Validator>) -> Result<Self, CheckError> {
        self.register(validator)?;
        Ok(self)
    }

    pub fn get(&self, validator_type: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(validator_type)
    }

    pub fn contains(&self, validator_type: &str) -> bool {
        self.validators.contains_key(validator_type)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Registered tags in lexical order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorSet")
            .field("types", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Checks a value inside the contract's specification document.
///
/// Criterion config:
/// `{"pointer": "/info/version", "equals": "2.0.0"}` requires the value at the
/// JSON pointer to equal `equals`; without `equals` the value only has to
/// exist.
#[derive(Debug, Clone, Default)]
pub struct SpecificationValidator;

impl SpecificationValidator {
    pub const TYPE: &'static str = "specification";
}

#[async_trait]
impl Validator for SpecificationValidator {
    fn validator_type(&self) -> &str {
        Self::TYPE
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn validate(
        &self,
        criterion: &AcceptanceCriterion,
        context: &ValidationContext,
    ) -> Result<CriterionResult, CheckError> {
        let pointer = criterion
            .config
            .get("pointer")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CheckError::ValidatorFailed {
                criterion_id: criterion.criterion_id.clone(),
                reason: "config.pointer must be a string".to_string(),
            })?;

        let id = criterion.criterion_id.clone();
        let Some(actual) = context.specification.pointer(pointer) else {
            return Ok(CriterionResult::fail(
                id,
                format!("specification has no value at {pointer}"),
            ));
        };

        match criterion.config.get("equals") {
            None => Ok(CriterionResult::pass(id)),
            Some(expected) if expected == actual => {
                Ok(CriterionResult::pass(id).with_values(actual.clone(), expected.clone()))
            }
            Some(expected) => Ok(CriterionResult::fail(
                id,
                format!("value at {pointer} does not match"),
            )
            .with_values(actual.clone(), expected.clone())),
        }
    }
}
