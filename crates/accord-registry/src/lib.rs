//! Contract registry: the coordinating layer over accord's contract model.
//!
//! [`ContractRegistry`] owns every contract record, the dependency graph and
//! the persistence backend. It runs lifecycle transitions under per-contract
//! locks, applies amendments, records verification results and propagates
//! breaches to dependents, publishing each appended event to subscribers.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod telemetry;
pub mod transitions;
pub mod verification;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use events::{EventBus, EventSink, SubscriberId, TracingSink};
pub use registry::{ContractRegistry, ContractUpdate, OVERDUE_SWEEP_ACTOR};
pub use telemetry::init_tracing;
pub use transitions::{Amendment, BreachReport};
pub use verification::VerificationOutcome;
