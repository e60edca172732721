//! Storage abstraction for accord contracts.
//!
//! Provides the [`ContractStore`] trait defining the persistence contract that
//! all backends implement, the [`InMemoryStore`] and [`SqliteStore`] backends,
//! and the deterministic verification cache keys in [`hash`].
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`hash`]: blake3 cache keys over contracts and verification results
//! - [`types`]: storage-layer record types
//! - [`traits`]: ContractStore trait definition
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use hash::{contract_cache_key, result_cache_key, verification_cache_key, CacheKey};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ContractStore;
pub use types::CachedVerification;
