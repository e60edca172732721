//! In-memory implementation of [`ContractStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and for registries
//! that do not need persistence. It has the same semantics as the SQLite
//! backend, including event sequence checks.

use std::collections::{BTreeMap, HashMap};

use accord_core::{Contract, ContractEvent, ContractId};

use crate::error::StorageError;
use crate::hash::CacheKey;
use crate::traits::{check_next_sequence, ContractStore};
use crate::types::CachedVerification;

/// Map-backed contract store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// Records, without their event logs.
    contracts: BTreeMap<ContractId, Contract>,
    events: HashMap<ContractId, Vec<ContractEvent>>,
    cache: HashMap<CacheKey, CachedVerification>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_exists(&self, id: &ContractId) -> Result<(), StorageError> {
        if self.contracts.contains_key(id) {
            Ok(())
        } else {
            Err(StorageError::ContractNotFound(id.clone()))
        }
    }

    fn last_sequence(&self, id: &ContractId) -> Option<u64> {
        self.events
            .get(id)
            .and_then(|log| log.last())
            .map(|event| event.sequence)
    }
}

impl ContractStore for InMemoryStore {
    fn save_contract(&mut self, contract: &Contract) -> Result<(), StorageError> {
        let mut record = contract.clone();
        record.events.clear();
        record.enables.clear();
        self.contracts.insert(record.contract_id.clone(), record);
        Ok(())
    }

    fn load_contract(&self, id: &ContractId) -> Result<Contract, StorageError> {
        let mut contract = self
            .contracts
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::ContractNotFound(id.clone()))?;
        contract.events = self.events.get(id).cloned().unwrap_or_default();
        Ok(contract)
    }

    fn list_contract_ids(&self) -> Result<Vec<ContractId>, StorageError> {
        Ok(self.contracts.keys().cloned().collect())
    }

    fn append_event(&mut self, event: &ContractEvent) -> Result<(), StorageError> {
        self.ensure_exists(&event.contract_id)?;
        check_next_sequence(event, self.last_sequence(&event.contract_id))?;
        self.events
            .entry(event.contract_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn load_events(&self, id: &ContractId) -> Result<Vec<ContractEvent>, StorageError> {
        self.ensure_exists(id)?;
        Ok(self.events.get(id).cloned().unwrap_or_default())
    }

    fn record(&mut self, contract: &Contract, event: &ContractEvent) -> Result<(), StorageError> {
        // Validate the event before touching the record.
        if event.contract_id != contract.contract_id {
            return Err(StorageError::IntegrityError {
                reason: format!(
                    "event for {} recorded against {}",
                    event.contract_id, contract.contract_id
                ),
            });
        }
        check_next_sequence(event, self.last_sequence(&event.contract_id))?;
        self.save_contract(contract)?;
        self.append_event(event)
    }

    fn put_cached_verification(
        &mut self,
        key: &CacheKey,
        entry: &CachedVerification,
    ) -> Result<(), StorageError> {
        self.cache.insert(*key, entry.clone());
        Ok(())
    }

    fn get_cached_verification(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CachedVerification>, StorageError> {
        Ok(self.cache.get(key).cloned())
    }
}
