//! DependencyGraph: the `depends_on` graph over all registered contracts.
//!
//! Edges point from a contract to each contract it depends on
//! (`A depends_on B` gives the edge `A -> B`). The edge set lives in a petgraph
//! `StableGraph`; two ordered index maps mirror it so that dependency and
//! dependent lookups are single map reads rather than traversals.
//!
//! # Acyclicity
//!
//! Every mutation runs a depth-first reachability check before touching the
//! graph: if the contract being inserted or amended is reachable from any of
//! its new dependencies, the mutation fails with
//! [`CoreError::CycleDetected`] and nothing changes.
//!
//! # Execution plans
//!
//! [`DependencyGraph::execution_plan`] runs Kahn's algorithm over a caller
//! selected subgraph and groups each round of zero in-degree nodes into one
//! parallel batch, ordered lexically by contract ID.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::ContractId;

/// Ordered adjacency view of the graph, for equality checks and persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot(pub BTreeMap<ContractId, BTreeSet<ContractId>>);

/// A dependency-respecting ordering plus its parallel batch structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// One valid linearization: the batches concatenated.
    pub order: Vec<ContractId>,
    /// Each batch only depends on contracts in earlier batches.
    pub batches: Vec<Vec<ContractId>>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of `id` in the flat order.
    pub fn position(&self, id: &ContractId) -> Option<usize> {
        self.order.iter().position(|c| c == id)
    }

    /// Index of the batch containing `id`.
    pub fn batch_of(&self, id: &ContractId) -> Option<usize> {
        self.batches.iter().position(|batch| batch.contains(id))
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .batches
            .iter()
            .map(|batch| {
                let ids: Vec<&str> = batch.iter().map(ContractId::as_str).collect();
                format!("[{}]", ids.join(", "))
            })
            .collect();
        f.write_str(&rendered.join(" -> "))
    }
}

/// The dependency graph manager.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Edge store. Node weights are contract IDs.
    graph: StableGraph<ContractId, (), Directed, u32>,
    /// Contract ID -> node, in registration order.
    index: IndexMap<ContractId, NodeIndex<u32>>,
    /// Forward index: contract -> what it depends on.
    dependencies: HashMap<ContractId, BTreeSet<ContractId>>,
    /// Inverse index: contract -> what depends on it.
    dependents: HashMap<ContractId, BTreeSet<ContractId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from persisted `(contract, depends_on)` entries.
    ///
    /// Entries may arrive in any order. Fails with `GraphInconsistency` if a
    /// dependency is missing or the stored edges contain a cycle.
    pub fn restore<I>(entries: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (ContractId, BTreeSet<ContractId>)>,
    {
        let entries: Vec<(ContractId, BTreeSet<ContractId>)> = entries.into_iter().collect();
        let mut graph = DependencyGraph::new();

        for (id, _) in &entries {
            if graph.index.contains_key(id) {
                return Err(CoreError::GraphInconsistency {
                    reason: format!("contract {id} stored twice"),
                });
            }
            graph.add_node(id.clone());
        }

        for (id, deps) in &entries {
            for dep in deps {
                if !graph.index.contains_key(dep) {
                    return Err(CoreError::GraphInconsistency {
                        reason: format!("{id} depends on unknown contract {dep}"),
                    });
                }
            }
            graph.set_edges(id, deps);
        }

        if petgraph::algo::is_cyclic_directed(&graph.graph) {
            return Err(CoreError::GraphInconsistency {
                reason: "stored dependency edges contain a cycle".to_string(),
            });
        }

        #[cfg(debug_assertions)]
        graph.assert_consistency();

        Ok(graph)
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &ContractId) -> bool {
        self.index.contains_key(id)
    }

    /// Contract IDs in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &ContractId> {
        self.index.keys()
    }

    /// Direct dependencies of `id`.
    pub fn dependencies(&self, id: &ContractId) -> Option<&BTreeSet<ContractId>> {
        self.dependencies.get(id)
    }

    /// Direct dependents of `id` (contracts listing it in `depends_on`).
    pub fn dependents(&self, id: &ContractId) -> Option<&BTreeSet<ContractId>> {
        self.dependents.get(id)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot(
            self.dependencies
                .iter()
                .map(|(id, deps)| (id.clone(), deps.clone()))
                .collect(),
        )
    }

    // -----------------------------------------------------------------------
    // Mutations (all-or-nothing)
    // -----------------------------------------------------------------------

    /// Inserts a new contract node with its dependency edges.
    ///
    /// Every dependency must already be present. Nothing is mutated unless
    /// all checks pass.
    pub fn insert(
        &mut self,
        id: &ContractId,
        depends_on: &BTreeSet<ContractId>,
    ) -> Result<(), CoreError> {
        if self.contains(id) {
            return Err(CoreError::DuplicateContract { id: id.clone() });
        }
        self.check_edges(id, depends_on)?;

        self.add_node(id.clone());
        self.set_edges(id, depends_on);

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Replaces the dependency edges of an existing contract.
    pub fn replace_dependencies(
        &mut self,
        id: &ContractId,
        depends_on: &BTreeSet<ContractId>,
    ) -> Result<(), CoreError> {
        if !self.contains(id) {
            return Err(CoreError::ContractNotFound { id: id.clone() });
        }
        self.check_edges(id, depends_on)?;

        self.set_edges(id, depends_on);

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    /// Validates that `id -> depends_on` would reference known contracts and
    /// keep the graph acyclic.
    pub fn check_edges(
        &self,
        id: &ContractId,
        depends_on: &BTreeSet<ContractId>,
    ) -> Result<(), CoreError> {
        for dep in depends_on {
            if dep != id && !self.contains(dep) {
                return Err(CoreError::ContractNotFound { id: dep.clone() });
            }
        }
        match self.find_cycle(id, depends_on) {
            Some(path) => Err(CoreError::CycleDetected { path }),
            None => Ok(()),
        }
    }

    /// Returns the cycle `[id, dep, .., id]` that the edges `id -> depends_on`
    /// would close, if any.
    ///
    /// Runs a depth-first search from each new dependency along existing
    /// dependency edges. The current outgoing edges of `id` are never
    /// followed, since they are the ones being replaced.
    pub fn find_cycle(
        &self,
        id: &ContractId,
        depends_on: &BTreeSet<ContractId>,
    ) -> Option<Vec<ContractId>> {
        if depends_on.contains(id) {
            return Some(vec![id.clone(), id.clone()]);
        }

        for start in depends_on {
            let mut parent: HashMap<&ContractId, &ContractId> = HashMap::new();
            let mut visited: BTreeSet<&ContractId> = BTreeSet::new();
            let mut stack: Vec<&ContractId> = vec![start];
            visited.insert(start);

            while let Some(current) = stack.pop() {
                let Some(next) = self.dependencies.get(current) else {
                    continue;
                };
                for dep in next {
                    if dep == id {
                        // Walk parents back to `start`, then close the loop.
                        let mut path = vec![current.clone()];
                        let mut cursor = current;
                        while let Some(&p) = parent.get(cursor) {
                            path.push(p.clone());
                            cursor = p;
                        }
                        path.reverse();
                        let mut cycle = Vec::with_capacity(path.len() + 2);
                        cycle.push(id.clone());
                        cycle.extend(path);
                        cycle.push(id.clone());
                        return Some(cycle);
                    }
                    if visited.insert(dep) {
                        parent.insert(dep, current);
                        stack.push(dep);
                    }
                }
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Checks every dependency of `id` against `satisfied`.
    ///
    /// Returns `(ready, unmet)` with `unmet` in lexical order.
    pub fn can_execute<F>(
        &self,
        id: &ContractId,
        satisfied: F,
    ) -> Result<(bool, Vec<ContractId>), CoreError>
    where
        F: Fn(&ContractId) -> bool,
    {
        let deps = self
            .dependencies
            .get(id)
            .ok_or_else(|| CoreError::ContractNotFound { id: id.clone() })?;
        let unmet: Vec<ContractId> = deps.iter().filter(|d| !satisfied(*d)).cloned().collect();
        Ok((unmet.is_empty(), unmet))
    }

    /// Kahn's algorithm over the subgraph of contracts selected by `include`.
    ///
    /// Only edges between included contracts constrain the order. Each round
    /// removes every zero in-degree node at once; that set, sorted by
    /// contract ID, is one batch.
    pub fn execution_plan<F>(&self, include: F) -> Result<ExecutionPlan, CoreError>
    where
        F: Fn(&ContractId) -> bool,
    {
        let included: BTreeSet<&ContractId> = self.index.keys().filter(|id| include(*id)).collect();

        let mut in_degree: BTreeMap<&ContractId, usize> = BTreeMap::new();
        for &id in &included {
            let degree = self
                .dependencies
                .get(id)
                .map_or(0, |deps| deps.iter().filter(|d| included.contains(d)).count());
            in_degree.insert(id, degree);
        }

        let mut ready: BTreeSet<&ContractId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut plan = ExecutionPlan::default();
        while !ready.is_empty() {
            let batch: Vec<&ContractId> = ready.iter().copied().collect();
            let mut next: BTreeSet<&ContractId> = BTreeSet::new();

            for &id in &batch {
                let Some(dependents) = self.dependents.get(id) else {
                    continue;
                };
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }

            plan.order.extend(batch.iter().map(|&id| id.clone()));
            plan.batches.push(batch.into_iter().cloned().collect());
            ready = next;
        }

        if plan.order.len() != included.len() {
            return Err(CoreError::GraphInconsistency {
                reason: format!(
                    "execution plan covered {} of {} contracts; dependency cycle present",
                    plan.order.len(),
                    included.len()
                ),
            });
        }

        Ok(plan)
    }

    /// Transitive dependents of `id` (excluding `id`), in lexical order.
    pub fn transitive_dependents(&self, id: &ContractId) -> Vec<ContractId> {
        let mut seen: BTreeSet<&ContractId> = BTreeSet::new();
        let mut stack: Vec<&ContractId> = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(dependents) = self.dependents.get(current) {
                for dependent in dependents {
                    if seen.insert(dependent) {
                        stack.push(dependent);
                    }
                }
            }
        }
        seen.into_iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn add_node(&mut self, id: ContractId) {
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        self.dependencies.entry(id.clone()).or_default();
        self.dependents.entry(id).or_default();
    }

    /// Replaces the outgoing edges of `id`. Callers have already validated them.
    fn set_edges(&mut self, id: &ContractId, depends_on: &BTreeSet<ContractId>) {
        let idx = self.index[id];

        let old_edges: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in old_edges {
            self.graph.remove_edge(edge);
        }
        if let Some(old) = self.dependencies.get(id) {
            for dep in old {
                if let Some(set) = self.dependents.get_mut(dep) {
                    set.remove(id);
                }
            }
        }

        for dep in depends_on {
            let dep_idx = self.index[dep];
            self.graph.add_edge(idx, dep_idx, ());
            self.dependents.entry(dep.clone()).or_default().insert(id.clone());
        }
        self.dependencies.insert(id.clone(), depends_on.clone());
    }

    /// Verifies that the index maps mirror the petgraph edge set and that the
    /// graph is acyclic.
    ///
    /// Only called in debug builds (via `cfg(debug_assertions)`).
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        let indexed_edges: usize = self.dependencies.values().map(BTreeSet::len).sum();
        assert_eq!(
            indexed_edges,
            self.graph.edge_count(),
            "dependency index and edge store disagree"
        );
        for (id, deps) in &self.dependencies {
            for dep in deps {
                assert!(
                    self.dependents.get(dep).is_some_and(|s| s.contains(id)),
                    "inverse index missing {dep} <- {id}"
                );
            }
        }
        assert!(
            !petgraph::algo::is_cyclic_directed(&self.graph),
            "dependency graph contains a cycle"
        );
    }
}
