//! SQLite implementation of [`ContractStore`].
//!
//! [`SqliteStore`] persists contract records, event logs and cached verdicts
//! in a SQLite database with WAL mode and automatic schema migrations. Every
//! write runs inside a transaction. Domain values are stored as JSON TEXT
//! columns via serde_json; a few record fields are duplicated into plain
//! columns for indexing.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use accord_core::{Contract, ContractEvent, ContractId};

use crate::error::StorageError;
use crate::hash::CacheKey;
use crate::traits::{check_next_sequence, ContractStore};
use crate::types::CachedVerification;

/// SQLite-backed implementation of [`ContractStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn upsert_contract(tx: &Transaction<'_>, contract: &Contract) -> Result<(), StorageError> {
        let record_json = serde_json::to_string(contract)?;
        tx.execute(
            "INSERT INTO contracts (contract_id, contract_type, contract_version, state, provider, is_blocking, record_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(contract_id) DO UPDATE SET \
                contract_type = excluded.contract_type, \
                contract_version = excluded.contract_version, \
                state = excluded.state, \
                provider = excluded.provider, \
                is_blocking = excluded.is_blocking, \
                record_json = excluded.record_json",
            params![
                contract.contract_id.as_str(),
                contract.contract_type,
                contract.contract_version,
                contract.state.as_str(),
                contract.provider.as_str(),
                contract.is_blocking as i32,
                record_json,
            ],
        )?;
        Ok(())
    }

    fn insert_event(tx: &Transaction<'_>, event: &ContractEvent) -> Result<(), StorageError> {
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM contracts WHERE contract_id = ?1)",
            params![event.contract_id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::ContractNotFound(event.contract_id.clone()));
        }

        let last: Option<i64> = tx.query_row(
            "SELECT MAX(sequence) FROM contract_events WHERE contract_id = ?1",
            params![event.contract_id.as_str()],
            |row| row.get(0),
        )?;
        check_next_sequence(event, last.map(|seq| seq as u64))?;

        let event_json = serde_json::to_string(event)?;
        tx.execute(
            "INSERT INTO contract_events (contract_id, sequence, event_id, kind, contract_version, actor, occurred_at, event_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.contract_id.as_str(),
                event.sequence as i64,
                event.event_id.to_string(),
                event.kind.label(),
                event.contract_version,
                event.actor.as_str(),
                event.occurred_at.to_rfc3339(),
                event_json,
            ],
        )?;
        Ok(())
    }

    fn read_record(&self, id: &ContractId) -> Result<Contract, StorageError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM contracts WHERE contract_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| StorageError::ContractNotFound(id.clone()))?;
        let contract: Contract = serde_json::from_str(&json)?;
        if &contract.contract_id != id {
            return Err(StorageError::ReconstructionError {
                reason: format!("row {id} holds record for {}", contract.contract_id),
            });
        }
        Ok(contract)
    }

    fn read_events(&self, id: &ContractId) -> Result<Vec<ContractEvent>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT event_json FROM contract_events WHERE contract_id = ?1 ORDER BY sequence",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for json in rows {
            events.push(serde_json::from_str::<ContractEvent>(&json?)?);
        }
        Ok(events)
    }
}

impl ContractStore for SqliteStore {
    fn save_contract(&mut self, contract: &Contract) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        Self::upsert_contract(&tx, contract)?;
        tx.commit()?;
        Ok(())
    }

    fn load_contract(&self, id: &ContractId) -> Result<Contract, StorageError> {
        let mut contract = self.read_record(id)?;
        contract.events = self.read_events(id)?;
        Ok(contract)
    }

    fn list_contract_ids(&self) -> Result<Vec<ContractId>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT contract_id FROM contracts ORDER BY contract_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(ContractId::new(id?));
        }
        Ok(ids)
    }

    fn append_event(&mut self, event: &ContractEvent) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        Self::insert_event(&tx, event)?;
        tx.commit()?;
        Ok(())
    }

    fn load_events(&self, id: &ContractId) -> Result<Vec<ContractEvent>, StorageError> {
        // Distinguish "no events" from "no contract".
        self.read_record(id)?;
        self.read_events(id)
    }

    fn record(&mut self, contract: &Contract, event: &ContractEvent) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        Self::upsert_contract(&tx, contract)?;
        Self::insert_event(&tx, event)?;
        tx.commit()?;
        Ok(())
    }

    fn put_cached_verification(
        &mut self,
        key: &CacheKey,
        entry: &CachedVerification,
    ) -> Result<(), StorageError> {
        let entry_json = serde_json::to_string(entry)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO verification_cache (cache_key, contract_id, contract_version, entry_json) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.to_hex(),
                entry.contract_id.as_str(),
                entry.contract_version,
                entry_json,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_cached_verification(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CachedVerification>, StorageError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT entry_json FROM verification_cache WHERE cache_key = ?1",
                params![key.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
