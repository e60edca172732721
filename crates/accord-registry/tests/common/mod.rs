//! Shared fixtures for registry integration tests.

#![allow(dead_code)]

use accord_core::{
    AcceptanceCriterion, Contract, ContractId, ContractState, CriterionResult, PartyId,
    VerificationResult,
};
use accord_registry::ContractRegistry;

pub fn provider() -> PartyId {
    PartyId::from("team-api")
}

pub fn verifier() -> PartyId {
    PartyId::from("ci")
}

pub fn id(value: &str) -> ContractId {
    ContractId::from(value)
}

/// A DRAFT contract with one required criterion ("schema") and one optional
/// criterion ("latency").
pub fn contract(contract_id: &str) -> Contract {
    Contract::builder(contract_id, "API_SPECIFICATION", "team-api")
        .criterion(AcceptanceCriterion::new("schema", "json-schema"))
        .criterion(AcceptanceCriterion::new("latency", "load").optional().non_blocking())
        .build()
}

pub fn depending_on(contract_id: &str, dependencies: &[&str]) -> Contract {
    let mut builder = Contract::builder(contract_id, "UI_COMPONENT", "team-ui")
        .criterion(AcceptanceCriterion::new("schema", "json-schema"));
    for dependency in dependencies {
        builder = builder.depends_on(*dependency);
    }
    builder.build()
}

/// Every declared criterion passes.
pub fn passing(contract: &Contract) -> VerificationResult {
    contract.criteria.iter().fold(
        VerificationResult::new(contract.contract_id.clone(), contract.contract_version, "ci"),
        |result, criterion| result.with_result(CriterionResult::pass(criterion.criterion_id.clone())),
    )
}

/// Required criteria pass, optional ones fail.
pub fn warning(contract: &Contract) -> VerificationResult {
    contract.criteria.iter().fold(
        VerificationResult::new(contract.contract_id.clone(), contract.contract_version, "ci"),
        |result, criterion| {
            let outcome = if criterion.required {
                CriterionResult::pass(criterion.criterion_id.clone())
            } else {
                CriterionResult::fail(criterion.criterion_id.clone(), "slow")
            };
            result.with_result(outcome)
        },
    )
}

/// Every declared criterion fails.
pub fn failing(contract: &Contract) -> VerificationResult {
    contract.criteria.iter().fold(
        VerificationResult::new(contract.contract_id.clone(), contract.contract_version, "ci"),
        |result, criterion| {
            result.with_result(CriterionResult::fail(criterion.criterion_id.clone(), "broken"))
        },
    )
}

/// Drives a registered DRAFT contract to FULFILLED.
pub async fn fulfill(registry: &ContractRegistry, contract_id: &str) -> Contract {
    let cid = id(contract_id);
    let actor = provider();
    registry.propose(&cid, &actor).await.unwrap();
    registry.accept(&cid, &actor).await.unwrap();
    registry.start(&cid, &actor).await.unwrap();
    let contract = registry.fulfill(&cid, &actor, None).await.unwrap();
    assert_eq!(contract.state, ContractState::Fulfilled);
    contract
}

/// Drives a registered DRAFT contract to VERIFIED.
pub async fn verify(registry: &ContractRegistry, contract_id: &str) -> Contract {
    let fulfilled = fulfill(registry, contract_id).await;
    let outcome = registry
        .verify(&fulfilled.contract_id, passing(&fulfilled))
        .await
        .unwrap();
    assert_eq!(outcome.state(), ContractState::Verified);
    outcome.contract
}
