//! The [`ContractStore`] trait defining the persistence contract for contracts.
//!
//! A store holds three things:
//! - one **record** per contract (identity, state, specification, criteria),
//!   overwritten on every accepted mutation;
//! - an **append-only event log** per contract, whose sequence numbers must be
//!   contiguous from 1;
//! - the **verification cache**, memoized verdicts keyed by [`CacheKey`].
//!
//! The trait is synchronous. The registry serializes writers itself and keeps
//! the store behind an async mutex.

use accord_core::{Contract, ContractEvent, ContractId};

use crate::error::StorageError;
use crate::hash::CacheKey;
use crate::types::CachedVerification;

/// The storage contract for contract records, event logs and cached verdicts.
pub trait ContractStore {
    /// Inserts or overwrites a contract record.
    ///
    /// The record's in-memory `events` are ignored; the log is written only
    /// through [`ContractStore::append_event`].
    fn save_contract(&mut self, contract: &Contract) -> Result<(), StorageError>;

    /// Loads one contract record with its event log attached.
    fn load_contract(&self, id: &ContractId) -> Result<Contract, StorageError>;

    /// All stored contract IDs in lexical order.
    fn list_contract_ids(&self) -> Result<Vec<ContractId>, StorageError>;

    /// Every stored contract, sorted by ID, with event logs attached.
    fn load_all(&self) -> Result<Vec<Contract>, StorageError> {
        self.list_contract_ids()?
            .iter()
            .map(|id| self.load_contract(id))
            .collect()
    }

    /// Appends one event to its contract's log.
    ///
    /// Fails with `ContractNotFound` if no record exists, and with
    /// `IntegrityError` unless `event.sequence` is exactly one past the last
    /// stored sequence.
    fn append_event(&mut self, event: &ContractEvent) -> Result<(), StorageError>;

    /// The contract's event log, oldest first.
    fn load_events(&self, id: &ContractId) -> Result<Vec<ContractEvent>, StorageError>;

    /// Persists one accepted mutation: the new record plus the event that
    /// produced it. Backends override this to make the pair atomic.
    fn record(&mut self, contract: &Contract, event: &ContractEvent) -> Result<(), StorageError> {
        self.save_contract(contract)?;
        self.append_event(event)
    }

    fn put_cached_verification(
        &mut self,
        key: &CacheKey,
        entry: &CachedVerification,
    ) -> Result<(), StorageError>;

    fn get_cached_verification(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CachedVerification>, StorageError>;
}

/// Checks that `event` may follow a log whose last sequence is `last`.
pub(crate) fn check_next_sequence(
    event: &ContractEvent,
    last: Option<u64>,
) -> Result<(), StorageError> {
    let expected = last.map_or(1, |seq| seq + 1);
    if event.sequence != expected {
        return Err(StorageError::IntegrityError {
            reason: format!(
                "event for {} has sequence {}, expected {}",
                event.contract_id, event.sequence, expected
            ),
        });
    }
    Ok(())
}
