pub mod contract;
pub mod criteria;
pub mod error;
pub mod event;
pub mod filter;
pub mod graph;
pub mod id;
pub mod lifecycle;
pub mod types;

// Re-export commonly used types
pub use contract::{Contract, ContractBuilder, LifecycleTimestamps, ReverificationNotice};
pub use criteria::{AcceptanceCriterion, CriterionResult, Verdict, VerificationResult};
pub use error::CoreError;
pub use event::{replay, ContractEvent, EventKind};
pub use filter::{ContractFilter, PlanScope};
pub use graph::{DependencyGraph, ExecutionPlan, GraphSnapshot};
pub use id::{ContractId, CriterionId, EventId, PartyId};
pub use lifecycle::{check_transition, ContractState, TransitionKind};
pub use types::{ArtifactRef, Priority};
