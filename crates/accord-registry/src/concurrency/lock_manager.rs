//! Per-contract lock manager for concurrent registry mutations.
//!
//! [`LockManager`] hands out one exclusive lock per contract ID, so mutations
//! of different contracts proceed concurrently while mutations of the same
//! contract are serialized. A graph-wide read-write lock serializes structural
//! changes (registration, dependency-changing amendments, deletion).
//!
//! Lock order is always: graph lock first, then at most one contract lock.
//! Every acquisition is bounded by the configured timeout and fails with
//! [`RegistryError::LockTimeout`] instead of waiting forever.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use accord_core::ContractId;

use crate::error::RegistryError;

/// Held for the duration of one contract's critical section.
pub type ContractGuard = OwnedMutexGuard<()>;

pub struct LockManager {
    contract_locks: DashMap<ContractId, Arc<Mutex<()>>>,
    /// Global lock for dependency-graph structure changes.
    graph_lock: RwLock<()>,
    lock_timeout: Duration,
}

impl LockManager {
    pub fn new(lock_timeout: Duration) -> Self {
        LockManager {
            contract_locks: DashMap::new(),
            graph_lock: RwLock::new(()),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Acquires the exclusive lock for one contract.
    pub async fn lock_contract(&self, id: &ContractId) -> Result<ContractGuard, RegistryError> {
        // Clone the Arc out so no map shard is held across the await.
        let mutex = self.contract_locks.entry(id.clone()).or_default().clone();
        let guard = tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| self.timeout(format!("contract {id}")))?;
        debug!(contract_id = %id, "contract lock acquired");
        Ok(guard)
    }

    /// Shared graph lock: blocks structural changes, not other readers.
    pub async fn read_graph(&self) -> Result<RwLockReadGuard<'_, ()>, RegistryError> {
        tokio::time::timeout(self.lock_timeout, self.graph_lock.read())
            .await
            .map_err(|_| self.timeout("dependency graph".to_string()))
    }

    /// Exclusive graph lock for structural changes.
    pub async fn write_graph(&self) -> Result<RwLockWriteGuard<'_, ()>, RegistryError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.graph_lock.write())
            .await
            .map_err(|_| self.timeout("dependency graph".to_string()))?;
        debug!("graph write lock acquired");
        Ok(guard)
    }

    /// Contracts whose lock is currently held, in lexical order.
    pub fn held(&self) -> Vec<ContractId> {
        let mut held: Vec<ContractId> = self
            .contract_locks
            .iter()
            .filter(|entry| entry.value().try_lock().is_err())
            .map(|entry| entry.key().clone())
            .collect();
        held.sort();
        held
    }

    fn timeout(&self, resource: String) -> RegistryError {
        RegistryError::LockTimeout {
            resource,
            waited_ms: self.lock_timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_contract_is_exclusive() {
        let locks = LockManager::new(Duration::from_millis(50));
        let id = ContractId::from("C1");

        let guard = locks.lock_contract(&id).await.unwrap();
        assert_eq!(locks.held(), vec![id.clone()]);

        let err = locks.lock_contract(&id).await.unwrap_err();
        assert!(matches!(err, RegistryError::LockTimeout { .. }));

        drop(guard);
        assert!(locks.lock_contract(&id).await.is_ok());
    }

    #[tokio::test]
    async fn different_contracts_do_not_contend() {
        let locks = LockManager::new(Duration::from_millis(50));
        let _a = locks.lock_contract(&"A".into()).await.unwrap();
        assert!(locks.lock_contract(&"B".into()).await.is_ok());
    }

    #[tokio::test]
    async fn graph_write_waits_for_readers() {
        let locks = LockManager::new(Duration::from_millis(50));
        let reader = locks.read_graph().await.unwrap();
        assert!(locks.read_graph().await.is_ok());
        assert!(matches!(
            locks.write_graph().await,
            Err(RegistryError::LockTimeout { .. })
        ));
        drop(reader);
        assert!(locks.write_graph().await.is_ok());
    }
}
