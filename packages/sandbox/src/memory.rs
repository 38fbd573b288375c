//! Live module memory, rebuilt from a state dump for every call.

use std::collections::BTreeMap;

use ownables_state_store::StateDump;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Ordered key/value memory.
///
/// Dumps list pairs in key order, so equal memories always produce equal
/// dumps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a JSON value stored under `key`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<serde_json::Result<T>> {
        self.get(key.as_bytes()).map(serde_json::from_slice)
    }

    /// Store `value` as JSON under `key`.
    pub fn save<T: Serialize>(&mut self, key: &str, value: &T) -> serde_json::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key.as_bytes(), bytes);
        Ok(())
    }

    pub fn dump(&self) -> StateDump {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl From<StateDump> for Memory {
    fn from(dump: StateDump) -> Self {
        Self {
            entries: dump.into_iter().collect(),
        }
    }
}

impl From<&StateDump> for Memory {
    fn from(dump: &StateDump) -> Self {
        Self {
            entries: dump.iter().cloned().collect(),
        }
    }
}
