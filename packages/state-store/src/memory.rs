//! In-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ownables_event_chain::Hash;

use crate::dump::StateDump;
use crate::error::Result;
use crate::record::ChainRecord;
use crate::traits::{validate_id, ChainStore, StateDumpStore};

/// A store that keeps every partition in memory.
///
/// Each partition sits behind its own lock; a write replaces the whole value,
/// so readers never see a partial update.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dumps: RwLock<HashMap<String, StateDump>>,
    chains: RwLock<BTreeMap<String, ChainRecord>>,
    applied: RwLock<HashMap<String, Hash>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// Every write is a single insert or remove, so a poisoned map is still whole.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl StateDumpStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<StateDump>> {
        validate_id(id)?;
        Ok(read(&self.dumps).get(id).cloned())
    }

    fn put(&self, id: &str, dump: &StateDump) -> Result<()> {
        validate_id(id)?;
        write(&self.dumps).insert(id.to_string(), dump.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        write(&self.dumps).remove(id);
        Ok(())
    }
}

impl ChainStore for MemoryStore {
    fn load_chain(&self, id: &str) -> Result<Option<ChainRecord>> {
        validate_id(id)?;
        Ok(read(&self.chains).get(id).cloned())
    }

    fn save_chain(&self, id: &str, record: &ChainRecord) -> Result<()> {
        validate_id(id)?;
        write(&self.chains).insert(id.to_string(), record.clone());
        Ok(())
    }

    fn applied(&self, id: &str) -> Result<Option<Hash>> {
        Ok(read(&self.applied).get(id).copied())
    }

    fn set_applied(&self, id: &str, hash: &Hash) -> Result<()> {
        validate_id(id)?;
        write(&self.applied).insert(id.to_string(), *hash);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(read(&self.chains).keys().cloned().collect())
    }

    fn delete(&self, id: &str) -> Result<()> {
        write(&self.chains).remove(id);
        write(&self.applied).remove(id);
        Ok(())
    }
}
