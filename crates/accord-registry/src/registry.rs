//! ContractRegistry: the single coordinator over contracts, the dependency
//! graph, persistence and event delivery.
//!
//! All mutation flows through the registry's guarded entry points. This
//! module holds construction, CRUD, listing, history, graph queries, caching
//! and subscriptions; lifecycle transitions live in `transitions.rs` and
//! verification in `verification.rs`.
//!
//! # Concurrency
//!
//! - Current contract records live in a `DashMap`; readers clone them.
//! - A mutation holds its contract's lock (see [`LockManager`]) from the
//!   guard check until the new record is installed and its event published.
//! - Structural changes also hold the graph-wide write lock, taken before any
//!   contract lock.
//! - The graph data itself sits behind a `std::sync::RwLock` that is only held
//!   for short synchronous sections, never across an await.
//! - A failed persist leaves the in-memory record untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use accord_check::ArtifactStore;
use accord_core::{
    check_transition, replay, AcceptanceCriterion, Contract, ContractEvent, ContractFilter,
    ContractId, ContractState, CoreError, DependencyGraph, EventKind, ExecutionPlan,
    LifecycleTimestamps, PartyId, PlanScope, Priority, TransitionKind,
};
use accord_storage::{
    contract_cache_key, CacheKey, CachedVerification, ContractStore, InMemoryStore, SqliteStore,
};

use crate::concurrency::LockManager;
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::events::{EventBus, EventSink, SubscriberId};
use crate::transitions::{Amendment, BreachReport};

/// Actor recorded on breaches raised by the overdue sweep.
pub const OVERDUE_SWEEP_ACTOR: &str = "accord-overdue-sweep";

/// Field edits accepted by [`ContractRegistry::update`].
///
/// Descriptive fields are applied in place as a clarification. Any change to
/// `specification`, `criteria` or `depends_on` is applied as a breaking
/// amendment instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Option<BTreeSet<String>>,
    pub consumers: Option<BTreeSet<PartyId>>,
    pub is_blocking: Option<bool>,
    pub specification: Option<Value>,
    pub criteria: Option<Vec<AcceptanceCriterion>>,
    pub depends_on: Option<BTreeSet<ContractId>>,
}

impl ContractUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn consumers<I, P>(mut self, consumers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PartyId>,
    {
        self.consumers = Some(consumers.into_iter().map(Into::into).collect());
        self
    }

    pub fn blocking(mut self, is_blocking: bool) -> Self {
        self.is_blocking = Some(is_blocking);
        self
    }

    pub fn specification(mut self, specification: Value) -> Self {
        self.specification = Some(specification);
        self
    }

    pub fn criteria(mut self, criteria: Vec<AcceptanceCriterion>) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn depends_on<I, C>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ContractId>,
    {
        self.depends_on = Some(dependencies.into_iter().map(Into::into).collect());
        self
    }
}

pub struct ContractRegistry {
    pub(crate) contracts: DashMap<ContractId, Contract>,
    pub(crate) graph: RwLock<DependencyGraph>,
    pub(crate) locks: LockManager,
    pub(crate) store: Mutex<Box<dyn ContractStore + Send>>,
    pub(crate) events: EventBus,
    pub(crate) artifacts: Option<Arc<dyn ArtifactStore>>,
    config: RegistryConfig,
}

impl ContractRegistry {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// An empty registry backed by an [`InMemoryStore`].
    pub fn in_memory() -> Self {
        Self::assemble(
            Box::new(InMemoryStore::new()),
            RegistryConfig::default(),
            DashMap::new(),
            DependencyGraph::new(),
        )
    }

    /// Opens the store named by `config` (SQLite when `db_path` is set,
    /// in-memory otherwise) and restores every persisted contract.
    pub fn open(config: RegistryConfig) -> Result<Self, RegistryError> {
        let store: Box<dyn ContractStore + Send> = match &config.db_path {
            Some(path) => Box::new(SqliteStore::new(path)?),
            None => Box::new(InMemoryStore::new()),
        };
        Self::with_store(store, config)
    }

    /// Restores a registry from an existing store.
    ///
    /// Each contract's event log is replayed and must end in the stored
    /// state; the dependency graph is rebuilt and checked for cycles.
    pub fn with_store(
        store: Box<dyn ContractStore + Send>,
        config: RegistryConfig,
    ) -> Result<Self, RegistryError> {
        let contracts = DashMap::new();
        let mut edges = Vec::new();

        for contract in store.load_all()? {
            let replayed = replay(&contract.events)?;
            if replayed != contract.state {
                return Err(CoreError::ReplayMismatch {
                    contract_id: contract.contract_id.clone(),
                    reason: format!(
                        "event log ends in {replayed}, record says {}",
                        contract.state
                    ),
                }
                .into());
            }
            edges.push((contract.contract_id.clone(), contract.depends_on.clone()));
            contracts.insert(contract.contract_id.clone(), contract);
        }

        let graph = DependencyGraph::restore(edges)?;
        info!(contracts = contracts.len(), "registry restored from store");
        Ok(Self::assemble(store, config, contracts, graph))
    }

    fn assemble(
        store: Box<dyn ContractStore + Send>,
        config: RegistryConfig,
        contracts: DashMap<ContractId, Contract>,
        graph: DependencyGraph,
    ) -> Self {
        ContractRegistry {
            contracts,
            graph: RwLock::new(graph),
            locks: LockManager::new(config.lock_timeout),
            store: Mutex::new(store),
            events: EventBus::new(),
            artifacts: None,
            config,
        }
    }

    /// Enables integrity checks of result artifacts during `verify`.
    pub fn with_artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    pub(crate) fn read_graph(&self) -> RwLockReadGuard<'_, DependencyGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_graph(&self) -> RwLockWriteGuard<'_, DependencyGraph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the current record.
    pub(crate) fn snapshot(&self, id: &ContractId) -> Result<Contract, RegistryError> {
        self.contracts
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::ContractNotFound { id: id.clone() }.into())
    }

    /// Fills the derived `enables` view from the graph's inverse index.
    pub(crate) fn with_enables(&self, mut contract: Contract) -> Contract {
        contract.enables = self
            .read_graph()
            .dependents(&contract.contract_id)
            .cloned()
            .unwrap_or_default();
        contract
    }

    /// A dependency is satisfied when it is verified (with or without
    /// warnings) and not waiting for re-verification.
    pub(crate) fn dependency_satisfied(&self, id: &ContractId) -> bool {
        self.contracts.get(id).is_some_and(|dep| {
            dep.state.is_success_terminal() && dep.pending_reverification.is_none()
        })
    }

    /// Current versions of `dependencies`, as recorded on start and verify.
    pub(crate) fn current_versions(
        &self,
        dependencies: &BTreeSet<ContractId>,
    ) -> BTreeMap<ContractId, u32> {
        dependencies
            .iter()
            .filter_map(|id| {
                self.contracts
                    .get(id)
                    .map(|dep| (id.clone(), dep.contract_version))
            })
            .collect()
    }

    /// Rejects unknown or REJECTED dependencies.
    pub(crate) fn check_dependencies(
        &self,
        contract_id: &ContractId,
        dependencies: &BTreeSet<ContractId>,
    ) -> Result<(), RegistryError> {
        for dependency in dependencies {
            if dependency == contract_id {
                continue;
            }
            let state = self
                .contracts
                .get(dependency)
                .map(|dep| dep.state)
                .ok_or_else(|| CoreError::ContractNotFound {
                    id: dependency.clone(),
                })?;
            if state == ContractState::Rejected {
                return Err(CoreError::DependencyRejected {
                    contract_id: contract_id.clone(),
                    dependency: dependency.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Appends the next event to `contract` and persists record and event.
    ///
    /// On failure the event is removed again and nothing is installed.
    pub(crate) async fn persist(
        &self,
        contract: &mut Contract,
        actor: &PartyId,
        kind: EventKind,
    ) -> Result<ContractEvent, RegistryError> {
        let event = ContractEvent::new(
            contract.contract_id.clone(),
            contract.next_sequence(),
            contract.contract_version,
            actor.clone(),
            kind,
        );
        contract.events.push(event.clone());

        let mut store = self.store.lock().await;
        if let Err(err) = store.record(contract, &event) {
            contract.events.pop();
            return Err(err.into());
        }
        Ok(event)
    }

    /// Makes a persisted record current and publishes its event.
    pub(crate) fn install(&self, contract: Contract, event: &ContractEvent) {
        self.contracts.insert(contract.contract_id.clone(), contract);
        self.events.publish(event);
    }

    /// `persist` followed by `install`. Callers hold the contract's lock.
    pub(crate) async fn commit(
        &self,
        mut contract: Contract,
        actor: &PartyId,
        kind: EventKind,
    ) -> Result<Contract, RegistryError> {
        let event = self.persist(&mut contract, actor, kind).await?;
        self.install(contract.clone(), &event);
        Ok(contract)
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Registers a new DRAFT contract.
    ///
    /// Every dependency must already be registered and not REJECTED, and the
    /// new edges must keep the graph acyclic. The provider is recorded as the
    /// actor of the `Registered` event.
    pub async fn register(&self, mut contract: Contract) -> Result<Contract, RegistryError> {
        contract.validate()?;
        let id = contract.contract_id.clone();
        if contract.state != ContractState::Draft || !contract.events.is_empty() {
            return Err(CoreError::InvalidContract {
                contract_id: id,
                reason: "new contracts must be unregistered DRAFT records".to_string(),
            }
            .into());
        }

        let _graph = self.locks.write_graph().await?;
        if self.contracts.contains_key(&id) {
            return Err(CoreError::DuplicateContract { id }.into());
        }
        self.check_dependencies(&id, &contract.depends_on)?;
        self.read_graph().check_edges(&id, &contract.depends_on)?;

        contract.enables.clear();
        contract.timestamps = LifecycleTimestamps {
            created_at: Some(Utc::now()),
            ..LifecycleTimestamps::default()
        };
        contract.last_verification = None;
        contract.dependency_versions.clear();
        contract.pending_reverification = None;

        let provider = contract.provider.clone();
        let event = self
            .persist(&mut contract, &provider, EventKind::Registered)
            .await?;
        self.write_graph().insert(&id, &contract.depends_on)?;
        self.install(contract.clone(), &event);

        info!(
            contract_id = %id,
            contract_type = %contract.contract_type,
            dependencies = contract.depends_on.len(),
            "contract registered"
        );
        Ok(self.with_enables(contract))
    }

    /// A deep copy of the current record, with `enables` filled in.
    pub fn get(&self, id: &ContractId) -> Result<Contract, RegistryError> {
        self.snapshot(id).map(|contract| self.with_enables(contract))
    }

    /// Applies descriptive edits as one `Clarified` event (no version bump),
    /// then routes any specification, criteria or dependency change to a
    /// breaking [`amend`](ContractRegistry::amend).
    pub async fn update(
        &self,
        id: &ContractId,
        update: ContractUpdate,
        actor: &PartyId,
    ) -> Result<Contract, RegistryError> {
        let ContractUpdate {
            name,
            description,
            priority,
            tags,
            consumers,
            is_blocking,
            specification,
            criteria,
            depends_on,
        } = update;

        let clarified = {
            let _guard = self.locks.lock_contract(id).await?;
            let mut contract = self.snapshot(id)?;
            if contract.state == ContractState::Rejected {
                return Err(CoreError::InvalidContract {
                    contract_id: id.clone(),
                    reason: "rejected contracts are read-only".to_string(),
                }
                .into());
            }

            let mut fields = Vec::new();
            if let Some(name) = name.filter(|n| n != &contract.name) {
                contract.name = name;
                fields.push("name".to_string());
            }
            if let Some(description) = description.filter(|d| d != &contract.description) {
                contract.description = description;
                fields.push("description".to_string());
            }
            if let Some(priority) = priority.filter(|p| p != &contract.priority) {
                contract.priority = priority;
                fields.push("priority".to_string());
            }
            if let Some(tags) = tags.filter(|t| t != &contract.tags) {
                contract.tags = tags;
                fields.push("tags".to_string());
            }
            if let Some(consumers) = consumers.filter(|c| c != &contract.consumers) {
                contract.consumers = consumers;
                fields.push("consumers".to_string());
            }
            if let Some(is_blocking) = is_blocking.filter(|b| b != &contract.is_blocking) {
                contract.is_blocking = is_blocking;
                fields.push("is_blocking".to_string());
            }

            if fields.is_empty() {
                contract
            } else {
                contract.validate()?;
                info!(contract_id = %id, fields = ?fields, "contract clarified");
                self.commit(contract, actor, EventKind::Clarified { fields })
                    .await?
            }
        };

        let specification = specification.filter(|s| s != &clarified.specification);
        let criteria = criteria.filter(|c| c != &clarified.criteria);
        let depends_on = depends_on.filter(|d| d != &clarified.depends_on);
        if specification.is_none() && criteria.is_none() && depends_on.is_none() {
            return Ok(self.with_enables(clarified));
        }

        let mut changed = Vec::new();
        let mut amendment = Amendment::breaking(String::new());
        if let Some(specification) = specification {
            changed.push("specification");
            amendment = amendment.with_specification(specification);
        }
        if let Some(criteria) = criteria {
            changed.push("criteria");
            amendment = amendment.with_criteria(criteria);
        }
        if let Some(depends_on) = depends_on {
            changed.push("depends_on");
            amendment = amendment.with_dependencies(depends_on);
        }
        amendment.summary = format!("update changed {}", changed.join(", "));
        self.amend(id, amendment, actor).await
    }

    /// Soft delete: moves the contract to REJECTED.
    ///
    /// Refused with `HasDependents` while any non-REJECTED contract lists it
    /// in `depends_on`. History is kept.
    pub async fn delete(&self, id: &ContractId, actor: &PartyId) -> Result<Contract, RegistryError> {
        let retired = {
            let _graph = self.locks.read_graph().await?;
            let _guard = self.locks.lock_contract(id).await?;
            let mut contract = self.snapshot(id)?;
            check_transition(
                &contract,
                ContractState::Rejected,
                TransitionKind::Retirement,
                |_| true,
            )?;

            let live_dependents: Vec<ContractId> = self
                .read_graph()
                .dependents(id)
                .map(|dependents| {
                    dependents
                        .iter()
                        .filter(|d| {
                            self.contracts
                                .get(*d)
                                .is_some_and(|c| c.state != ContractState::Rejected)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if !live_dependents.is_empty() {
                return Err(CoreError::HasDependents {
                    contract_id: id.clone(),
                    dependents: live_dependents,
                }
                .into());
            }

            let from = contract.state;
            contract.state = ContractState::Rejected;
            contract.timestamps.record(ContractState::Rejected, Utc::now());
            contract.pending_reverification = None;
            let contract = self
                .commit(
                    contract,
                    actor,
                    EventKind::Rejected {
                        reason: "deleted".to_string(),
                    },
                )
                .await?;
            info!(contract_id = %id, from = %from, actor = %actor, "contract retired");
            contract
        };
        Ok(self.with_enables(retired))
    }

    /// Contracts matching `filter`, sorted by ID.
    pub fn list(&self, filter: &ContractFilter) -> Vec<Contract> {
        let mut matched: Vec<Contract> = self
            .contracts
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| a.contract_id.cmp(&b.contract_id));
        matched
            .into_iter()
            .map(|contract| self.with_enables(contract))
            .collect()
    }

    /// Case-insensitive free-text search over name and description.
    pub fn search(&self, text: &str) -> Vec<Contract> {
        self.list(&ContractFilter::new().text(text))
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// The contract's event log, oldest first.
    pub fn get_history(&self, id: &ContractId) -> Result<Vec<ContractEvent>, RegistryError> {
        self.contracts
            .get(id)
            .map(|entry| entry.events.clone())
            .ok_or_else(|| CoreError::ContractNotFound { id: id.clone() }.into())
    }

    /// Rebuilds the state from the event log and checks it against the record.
    pub fn replay_state(&self, id: &ContractId) -> Result<ContractState, RegistryError> {
        let contract = self.snapshot(id)?;
        let replayed = replay(&contract.events)?;
        if replayed != contract.state {
            return Err(CoreError::ReplayMismatch {
                contract_id: id.clone(),
                reason: format!("event log ends in {replayed}, record says {}", contract.state),
            }
            .into());
        }
        Ok(replayed)
    }

    // -----------------------------------------------------------------------
    // Graph queries
    // -----------------------------------------------------------------------

    /// `(ready, unmet)`: whether every dependency is satisfied right now.
    pub fn can_execute(&self, id: &ContractId) -> Result<(bool, Vec<ContractId>), RegistryError> {
        Ok(self
            .read_graph()
            .can_execute(id, |dep| self.dependency_satisfied(dep))?)
    }

    pub fn get_dependents(&self, id: &ContractId) -> Result<Vec<ContractId>, RegistryError> {
        self.read_graph()
            .dependents(id)
            .map(|set| set.iter().cloned().collect())
            .ok_or_else(|| CoreError::ContractNotFound { id: id.clone() }.into())
    }

    pub fn get_dependencies(&self, id: &ContractId) -> Result<Vec<ContractId>, RegistryError> {
        self.read_graph()
            .dependencies(id)
            .map(|set| set.iter().cloned().collect())
            .ok_or_else(|| CoreError::ContractNotFound { id: id.clone() }.into())
    }

    /// Execution plan over every non-REJECTED contract.
    ///
    /// The default scope is [`PlanScope::Live`] so that contracts still in
    /// DRAFT, PROPOSED or NEGOTIATING show where they will slot in once
    /// accepted. Schedulers that must only see committed work should call
    /// [`get_execution_plan_for`](Self::get_execution_plan_for) with
    /// [`PlanScope::Committed`] (ACCEPTED or later, REJECTED excluded).
    pub fn get_execution_plan(&self) -> Result<ExecutionPlan, RegistryError> {
        self.get_execution_plan_for(PlanScope::Live)
    }

    /// Execution plan over the contracts selected by `scope`.
    ///
    /// Plans are advisory snapshots: re-check `can_execute` before acting.
    pub fn get_execution_plan_for(&self, scope: PlanScope) -> Result<ExecutionPlan, RegistryError> {
        let plan = self.read_graph().execution_plan(|id| {
            self.contracts
                .get(id)
                .is_some_and(|contract| scope.includes(contract.state))
        });
        match plan {
            Ok(plan) => Ok(plan),
            Err(err) => {
                tracing::error!(error = %err, "dependency graph failed consistency check");
                Err(err.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Caching
    // -----------------------------------------------------------------------

    /// Cache key over the contract's identity, version and criteria.
    pub fn cache_key(&self, id: &ContractId) -> Result<CacheKey, RegistryError> {
        self.snapshot(id).map(|contract| contract_cache_key(&contract))
    }

    /// Verdict memoized under a verification cache key, if any.
    pub async fn cached_verification(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CachedVerification>, RegistryError> {
        let store = self.store.lock().await;
        Ok(store.get_cached_verification(key)?)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// A channel receiving every event appended from now on.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ContractEvent>) {
        self.events.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        self.events.add_sink(sink)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.events.unsubscribe(id)
    }

    // -----------------------------------------------------------------------
    // Overdue sweep
    // -----------------------------------------------------------------------

    /// Breaches every contract that has been IN_PROGRESS for longer than
    /// `max_age`. Contracts that change state concurrently are skipped.
    pub async fn breach_overdue(
        &self,
        max_age: Duration,
        actor: &PartyId,
    ) -> Result<Vec<BreachReport>, RegistryError> {
        let max_age_chrono = chrono::Duration::from_std(max_age)
            .map_err(|_| RegistryError::Internal("overdue age out of range".to_string()))?;
        let cutoff = Utc::now() - max_age_chrono;

        let mut overdue: Vec<ContractId> = self
            .contracts
            .iter()
            .filter(|entry| {
                entry.state == ContractState::InProgress
                    && entry.timestamps.started_at.is_some_and(|at| at <= cutoff)
            })
            .map(|entry| entry.key().clone())
            .collect();
        overdue.sort();

        let reason = format!("overdue: in progress for more than {}s", max_age.as_secs());
        let mut reports = Vec::new();
        for id in overdue {
            match self.breach(&id, &reason, actor).await {
                Ok(report) => reports.push(report),
                Err(RegistryError::Core(CoreError::InvalidTransition { .. })) => {
                    debug!(contract_id = %id, "overdue contract changed state, skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(reports)
    }

    /// Spawns a task that runs [`breach_overdue`](Self::breach_overdue) with
    /// the configured `overdue_after` every `interval`. Returns `None` when
    /// no overdue age is configured.
    pub fn start_overdue_sweep(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        let max_age = self.config.overdue_after?;
        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            let actor = PartyId::from(OVERDUE_SWEEP_ACTOR);
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                match registry.breach_overdue(max_age, &actor).await {
                    Ok(reports) if !reports.is_empty() => {
                        info!(breached = reports.len(), "overdue sweep breached contracts");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "overdue sweep failed"),
                }
            }
        }))
    }
}
