//! In-memory ledger for tests and offline use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use ownables_event_chain::{Anchor, Hash};

use crate::error::{AnchorError, Result};
use crate::ledger::LedgerClient;

/// A ledger kept in a map.
///
/// Keys are write-once: anchoring a different value under an existing key is
/// rejected. The ledger can be switched offline to exercise retry paths.
#[derive(Debug)]
pub struct MemoryLedger {
    entries: RwLock<HashMap<Hash, Hash>>,
    reachable: AtomicBool,
    submissions: AtomicUsize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of anchors recorded.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `anchor` calls.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AnchorError::Unreachable("memory ledger is offline".to_string()))
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn anchor(&self, anchors: &[Anchor]) -> Result<()> {
        self.check_reachable()?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if let Some(conflict) = anchors
            .iter()
            .find(|a| entries.get(&a.key).is_some_and(|v| *v != a.value))
        {
            return Err(AnchorError::Rejected {
                status: 409,
                body: format!("key {} already anchored", conflict.key),
            });
        }
        for anchor in anchors {
            entries.insert(anchor.key, anchor.value);
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lookup(&self, key: &Hash) -> Result<Option<Hash>> {
        self.check_reachable()?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).copied())
    }
}
