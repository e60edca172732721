//! Dependency graph behavior through the registry: gating, plans, cycles and
//! breach propagation.

mod common;

use accord_core::{Contract, ContractFilter, ContractState, CoreError, EventKind, PlanScope};
use accord_registry::{Amendment, ContractRegistry, RegistryError};
use proptest::prelude::*;

use common::*;

async fn accept(registry: &ContractRegistry, contract_id: &str) {
    registry.propose(&id(contract_id), &provider()).await.unwrap();
    registry.accept(&id(contract_id), &provider()).await.unwrap();
}

/// BREACHED -> IN_PROGRESS -> FULFILLED -> VERIFIED at the current version.
async fn repair(registry: &ContractRegistry, contract_id: &str) -> Contract {
    registry.start(&id(contract_id), &provider()).await.unwrap();
    let fulfilled = registry
        .fulfill(&id(contract_id), &provider(), None)
        .await
        .unwrap();
    registry
        .verify(&id(contract_id), passing(&fulfilled))
        .await
        .unwrap()
        .contract
}

#[tokio::test]
async fn execution_plan_orders_dependencies_first() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("C1")).await.unwrap();
    registry.register(depending_on("C2", &["C1"])).await.unwrap();

    let plan = registry.get_execution_plan().unwrap();
    assert_eq!(plan.order, vec![id("C1"), id("C2")]);
    assert_eq!(plan.batches, vec![vec![id("C1")], vec![id("C2")]]);

    assert_eq!(registry.get_dependents(&id("C1")).unwrap(), vec![id("C2")]);
    assert_eq!(registry.get_dependencies(&id("C2")).unwrap(), vec![id("C1")]);
    assert_eq!(
        registry.get(&id("C1")).unwrap().enables.into_iter().collect::<Vec<_>>(),
        vec![id("C2")]
    );
}

#[tokio::test]
async fn plan_batches_group_independent_contracts() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("api")).await.unwrap();
    registry.register(contract("schema")).await.unwrap();
    registry.register(depending_on("web", &["api", "schema"])).await.unwrap();
    registry.register(depending_on("mobile", &["api"])).await.unwrap();
    registry.register(depending_on("release", &["web", "mobile"])).await.unwrap();

    let plan = registry.get_execution_plan().unwrap();
    insta::assert_snapshot!(plan.to_string(), @"[api, schema] -> [mobile, web] -> [release]");

    // Only ACCEPTED-or-later contracts count for the committed plan.
    accept(&registry, "api").await;
    let committed = registry.get_execution_plan_for(PlanScope::Committed).unwrap();
    assert_eq!(committed.order, vec![id("api")]);

    // REJECTED contracts drop out of the live plan.
    registry.delete(&id("release"), &provider()).await.unwrap();
    let live = registry.get_execution_plan().unwrap();
    assert_eq!(live.len(), 4);
    assert_eq!(live.position(&id("release")), None);
}

#[tokio::test]
async fn start_waits_for_verified_dependencies() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("C1")).await.unwrap();
    registry.register(depending_on("C2", &["C1"])).await.unwrap();
    accept(&registry, "C2").await;

    let (ready, unmet) = registry.can_execute(&id("C2")).unwrap();
    assert!(!ready);
    assert_eq!(unmet, vec![id("C1")]);

    let err = registry.start(&id("C2"), &provider()).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Core(CoreError::DependencyNotMet { ref unmet, .. }) if unmet == &vec![id("C1")]
    ));
    assert_eq!(registry.get(&id("C2")).unwrap().state, ContractState::Accepted);

    verify(&registry, "C1").await;
    assert_eq!(registry.can_execute(&id("C2")).unwrap(), (true, vec![]));
    let started = registry.start(&id("C2"), &provider()).await.unwrap();
    assert_eq!(started.dependency_versions.get(&id("C1")), Some(&1));
}

#[tokio::test]
async fn unknown_dependency_is_rejected_at_registration() {
    let registry = ContractRegistry::in_memory();
    let err = registry
        .register(depending_on("C2", &["missing"]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn amendment_closing_a_cycle_changes_nothing() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("C1")).await.unwrap();
    registry.register(depending_on("C2", &["C1"])).await.unwrap();

    let err = registry
        .amend(
            &id("C1"),
            Amendment::breaking("depend on the UI").with_dependencies(["C2"]),
            &provider(),
        )
        .await
        .unwrap_err();
    match err {
        RegistryError::Core(CoreError::CycleDetected { path }) => {
            assert_eq!(path, vec![id("C1"), id("C2"), id("C1")]);
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }

    let c1 = registry.get(&id("C1")).unwrap();
    assert_eq!(c1.contract_version, 1);
    assert!(c1.depends_on.is_empty());
    assert!(registry.get_dependencies(&id("C1")).unwrap().is_empty());
    assert_eq!(c1.events.len(), 1);

    let err = registry
        .amend(
            &id("C1"),
            Amendment::non_breaking("self").with_dependencies(["C1"]),
            &provider(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::CycleDetected { .. })));
}

#[tokio::test]
async fn amendment_rewires_dependencies() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("A")).await.unwrap();
    registry.register(contract("B")).await.unwrap();
    registry.register(depending_on("C", &["A"])).await.unwrap();

    let amended = registry
        .amend(
            &id("C"),
            Amendment::non_breaking("switch backend").with_dependencies(["B"]),
            &provider(),
        )
        .await
        .unwrap();
    assert_eq!(amended.contract_version, 2);
    assert_eq!(amended.state, ContractState::Draft);
    assert!(registry.get_dependents(&id("A")).unwrap().is_empty());
    assert_eq!(registry.get_dependents(&id("B")).unwrap(), vec![id("C")]);
    assert!(matches!(
        amended.events.last().unwrap().kind,
        EventKind::Amended {
            dependencies_changed: true,
            previous_version: 1,
            new_version: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn breaking_amendment_reopens_negotiation() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("C1")).await.unwrap();
    verify(&registry, "C1").await;

    let amended = registry
        .amend(
            &id("C1"),
            Amendment::breaking("new response shape")
                .with_specification(serde_json::json!({"version": 2})),
            &provider(),
        )
        .await
        .unwrap();
    assert_eq!(amended.state, ContractState::Proposed);
    assert_eq!(amended.contract_version, 2);
    assert!(amended.timestamps.amended_at.is_some());
    assert!(amended.dependency_versions.is_empty());
    assert!(matches!(
        amended.events.last().unwrap().kind,
        EventKind::Amended {
            previous_state: ContractState::Verified,
            resulting_state: ContractState::Proposed,
            breaking: true,
            ..
        }
    ));
    assert_eq!(registry.replay_state(&id("C1")).unwrap(), ContractState::Proposed);

    // A non-breaking amendment keeps the state but still bumps the version.
    let clarified = registry
        .amend(&id("C1"), Amendment::non_breaking("wording"), &provider())
        .await
        .unwrap();
    assert_eq!(clarified.state, ContractState::Proposed);
    assert_eq!(clarified.contract_version, 3);
}

#[tokio::test]
async fn late_breach_flags_only_dependents_built_on_that_version() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("api")).await.unwrap();
    registry.register(depending_on("old-client", &["api"])).await.unwrap();
    registry.register(depending_on("web", &["api"])).await.unwrap();
    registry.register(depending_on("mobile", &["api"])).await.unwrap();
    registry.register(depending_on("release", &["web"])).await.unwrap();
    verify(&registry, "api").await;

    // old-client starts against version 1, then the API moves to version 2.
    accept(&registry, "old-client").await;
    registry.start(&id("old-client"), &provider()).await.unwrap();
    registry
        .amend(&id("api"), Amendment::non_breaking("docs"), &provider())
        .await
        .unwrap();

    // web is verified against version 2; mobile is only ACCEPTED.
    verify(&registry, "web").await;
    accept(&registry, "mobile").await;
    accept(&registry, "release").await;

    let report = registry
        .handle_late_breach(&id("api"), "data loss in production", &provider())
        .await
        .unwrap();
    assert!(report.late);
    assert_eq!(report.contract_version, 2);
    assert_eq!(report.flagged, vec![id("web")]);
    assert_eq!(report.skipped, vec![id("mobile"), id("old-client")]);

    let api = registry.get(&id("api")).unwrap();
    assert_eq!(api.state, ContractState::Breached);
    assert!(matches!(
        api.events.last().unwrap().kind,
        EventKind::Breached { late: true, .. }
    ));

    let web = registry.get(&id("web")).unwrap();
    assert_eq!(web.state, ContractState::Verified);
    let notice = web.pending_reverification.clone().unwrap();
    assert_eq!(notice.cause, id("api"));
    assert_eq!(notice.cause_version, 2);
    assert!(matches!(
        web.events.last().unwrap().kind,
        EventKind::ReverificationRequired { late: true, .. }
    ));
    assert!(registry
        .get(&id("old-client"))
        .unwrap()
        .pending_reverification
        .is_none());

    // A flagged dependency no longer satisfies its own dependents.
    let (ready, unmet) = registry.can_execute(&id("release")).unwrap();
    assert!(!ready);
    assert_eq!(unmet, vec![id("web")]);

    // web stays held until the API it relies on is verified again.
    let err = registry.verify(&id("web"), passing(&web)).await.unwrap_err();
    assert!(matches!(
        err.core(),
        Some(CoreError::DependencyNotMet { unmet, .. }) if unmet == &vec![id("api")]
    ));
    repair(&registry, "api").await;

    // Re-verifying clears the notice.
    let outcome = registry.verify(&id("web"), passing(&web)).await.unwrap();
    assert_eq!(outcome.state(), ContractState::Verified);
    assert!(outcome.contract.pending_reverification.is_none());
    assert!(registry.can_execute(&id("release")).unwrap().0);
}

#[tokio::test]
async fn failed_reverification_is_a_late_breach() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("api")).await.unwrap();
    registry.register(depending_on("web", &["api"])).await.unwrap();
    verify(&registry, "api").await;
    let web = verify(&registry, "web").await;
    registry
        .handle_late_breach(&id("api"), "regression", &provider())
        .await
        .unwrap();

    let outcome = registry.verify(&id("web"), failing(&web)).await.unwrap();
    assert_eq!(outcome.state(), ContractState::Breached);
    let report = outcome.breach.unwrap();
    assert!(report.late);
    assert!(matches!(
        outcome.contract.events.last().unwrap().kind,
        EventKind::Breached { late: true, .. }
    ));
}

#[tokio::test]
async fn ordinary_breach_of_non_blocking_contract_only_warns() {
    let registry = ContractRegistry::in_memory();
    let mut analytics = contract("analytics");
    analytics.is_blocking = false;
    registry.register(analytics).await.unwrap();
    registry.register(depending_on("dashboard", &["analytics"])).await.unwrap();

    accept(&registry, "analytics").await;
    registry.start(&id("analytics"), &provider()).await.unwrap();
    let report = registry
        .breach(&id("analytics"), "missed deadline", &provider())
        .await
        .unwrap();
    assert!(!report.blocking);
    assert!(!report.late);
    assert!(report.flagged.is_empty());
    assert_eq!(report.warned, vec![id("dashboard")]);
    assert_eq!(
        registry.get(&id("dashboard")).unwrap().events.len(),
        1,
        "dependent gets no event"
    );
}

#[tokio::test]
async fn blocking_breach_during_rework_flags_active_dependents() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("api")).await.unwrap();
    registry.register(depending_on("web", &["api"])).await.unwrap();

    let fulfilled = fulfill(&registry, "api").await;
    let outcome = registry.verify(&id("api"), warning(&fulfilled)).await.unwrap();
    assert_eq!(outcome.state(), ContractState::VerifiedWithWarnings);

    accept(&registry, "web").await;
    registry.start(&id("web"), &provider()).await.unwrap();

    // Rework the API and fail it.
    registry.start(&id("api"), &provider()).await.unwrap();
    let report = registry
        .breach(&id("api"), "rework abandoned", &provider())
        .await
        .unwrap();
    assert!(report.blocking);
    assert_eq!(report.flagged, vec![id("web")]);

    let web = registry.get(&id("web")).unwrap();
    assert_eq!(web.state, ContractState::InProgress);
    assert!(web.pending_reverification.is_some());

    // The halt holds until the API recovers.
    let err = registry
        .fulfill(&id("web"), &provider(), None)
        .await
        .unwrap_err();
    assert!(matches!(err.core(), Some(CoreError::DependencyNotMet { .. })));
    assert_eq!(registry.get(&id("web")).unwrap().state, ContractState::InProgress);
}

#[tokio::test]
async fn flagged_dependent_cannot_verify_while_dependency_is_breached() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("api")).await.unwrap();
    registry.register(depending_on("web", &["api"])).await.unwrap();
    verify(&registry, "api").await;
    accept(&registry, "web").await;
    registry.start(&id("web"), &provider()).await.unwrap();

    let report = registry
        .handle_late_breach(&id("api"), "schema drift", &provider())
        .await
        .unwrap();
    assert_eq!(report.flagged, vec![id("web")]);

    let err = registry
        .fulfill(&id("web"), &provider(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.core(),
        Some(CoreError::DependencyNotMet { unmet, .. }) if unmet == &vec![id("api")]
    ));
    let web = registry.get(&id("web")).unwrap();
    assert_eq!(web.state, ContractState::InProgress);
    assert!(web.pending_reverification.is_some());

    assert_eq!(
        registry.can_execute(&id("web")).unwrap(),
        (false, vec![id("api")])
    );

    repair(&registry, "api").await;
    let fulfilled = registry
        .fulfill(&id("web"), &provider(), None)
        .await
        .unwrap();
    let outcome = registry.verify(&id("web"), passing(&fulfilled)).await.unwrap();
    assert_eq!(outcome.state(), ContractState::Verified);
    assert!(outcome.contract.pending_reverification.is_none());
    assert_eq!(registry.get(&id("api")).unwrap().state, ContractState::Verified);
}

#[tokio::test]
async fn non_breaking_amendment_cannot_add_unmet_dependency_to_active_work() {
    let registry = ContractRegistry::in_memory();
    registry.register(contract("C1")).await.unwrap();
    registry.register(contract("D")).await.unwrap();
    registry.register(contract("E")).await.unwrap();
    accept(&registry, "C1").await;
    registry.start(&id("C1"), &provider()).await.unwrap();

    let err = registry
        .amend(
            &id("C1"),
            Amendment::non_breaking("needs D").with_dependencies(["D"]),
            &provider(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.core(),
        Some(CoreError::DependencyNotMet { unmet, .. }) if unmet == &vec![id("D")]
    ));
    let unchanged = registry.get(&id("C1")).unwrap();
    assert_eq!(unchanged.contract_version, 1);
    assert!(unchanged.depends_on.is_empty());
    assert!(registry.get_dependents(&id("D")).unwrap().is_empty());

    // A verified dependency may be added; the work records its version.
    verify(&registry, "E").await;
    let amended = registry
        .amend(
            &id("C1"),
            Amendment::non_breaking("needs E").with_dependencies(["E"]),
            &provider(),
        )
        .await
        .unwrap();
    assert_eq!(amended.state, ContractState::InProgress);
    assert_eq!(amended.dependency_versions.get(&id("E")), Some(&1));

    // So a later breach of E reaches it.
    let report = registry
        .handle_late_breach(&id("E"), "outage", &provider())
        .await
        .unwrap();
    assert_eq!(report.flagged, vec![id("C1")]);

    // A breaking amendment reopens negotiation instead.
    let reopened = registry
        .amend(
            &id("C1"),
            Amendment::breaking("needs D after all").with_dependencies(["D", "E"]),
            &provider(),
        )
        .await
        .unwrap();
    assert_eq!(reopened.state, ContractState::Proposed);
    assert!(reopened.dependency_versions.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn plan_respects_every_registered_edge(
        edges in proptest::collection::vec(proptest::collection::btree_set(0usize..12, 0..4), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let registry = ContractRegistry::in_memory();
            for (n, deps) in edges.iter().enumerate() {
                // Only earlier contracts exist yet, so the graph stays acyclic.
                let deps: Vec<String> = deps
                    .iter()
                    .filter(|d| **d < n)
                    .map(|d| format!("c{d:02}"))
                    .collect();
                let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                registry
                    .register(depending_on(&format!("c{n:02}"), &deps))
                    .await
                    .unwrap();
            }

            let plan = registry.get_execution_plan().unwrap();
            assert_eq!(plan.len(), edges.len());
            for contract in registry.list(&ContractFilter::new()) {
                for dep in &contract.depends_on {
                    assert!(plan.batch_of(dep) < plan.batch_of(&contract.contract_id));
                }
            }
        });
    }
}
