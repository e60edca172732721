//! Concurrency primitives for the registry.
//!
//! - [`lock_manager::LockManager`]: per-contract mutexes plus the graph-wide
//!   lock, all acquired with a bounded timeout

pub mod lock_manager;

pub use lock_manager::{ContractGuard, LockManager};
