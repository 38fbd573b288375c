//! Deferred anchor submission and verification.

use std::collections::BTreeMap;

use ownables_event_chain::{Anchor, Hash};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ledger::LedgerClient;

/// Queues anchors per source and submits them to a ledger.
///
/// A source is whatever produced the anchors, usually one chain. Each
/// source's batch is delivered on its own, so a rejected batch never holds
/// back another source. Batches that fail with a retryable error stay queued
/// for the next [`Anchorer::deliver`]; rejected batches are dropped.
pub struct Anchorer<L> {
    ledger: L,
    pending: Mutex<BTreeMap<String, Vec<Anchor>>>,
}

impl<L: LedgerClient> Anchorer<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Number of anchors waiting for submission, over all sources.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.values().map(Vec::len).sum()
    }

    /// Number of anchors waiting for `source`.
    pub async fn pending_for(&self, source: &str) -> usize {
        self.pending.lock().await.get(source).map_or(0, Vec::len)
    }

    /// Sources with anchors waiting.
    pub async fn sources(&self) -> Vec<String> {
        self.pending.lock().await.keys().cloned().collect()
    }

    /// Queue anchors for `source` without submitting them.
    ///
    /// Anchors already waiting are not queued twice.
    pub async fn enqueue(&self, source: &str, anchors: impl IntoIterator<Item = Anchor>) {
        let mut pending = self.pending.lock().await;
        let batch = pending.entry(source.to_string()).or_default();
        for anchor in anchors {
            if !batch.contains(&anchor) {
                batch.push(anchor);
            }
        }
        if batch.is_empty() {
            pending.remove(source);
        }
    }

    /// Queue anchors for `source` and deliver its batch.
    pub async fn submit(
        &self,
        source: &str,
        anchors: impl IntoIterator<Item = Anchor>,
    ) -> Result<Vec<Anchor>> {
        self.enqueue(source, anchors).await;
        self.deliver(source).await
    }

    /// Submit everything waiting for `source`. Returns the delivered anchors.
    pub async fn deliver(&self, source: &str) -> Result<Vec<Anchor>> {
        let Some(batch) = self.pending.lock().await.remove(source) else {
            return Ok(Vec::new());
        };

        match self.ledger.anchor(&batch).await {
            Ok(()) => {
                info!(source, anchors = batch.len(), "anchors submitted");
                Ok(batch)
            }
            Err(e) if e.is_retryable() => {
                warn!(source, error = %e, anchors = batch.len(), "anchoring deferred");
                let mut pending = self.pending.lock().await;
                let queued = pending.entry(source.to_string()).or_default();
                let newer: Vec<Anchor> = queued.drain(..).filter(|a| !batch.contains(a)).collect();
                queued.extend(batch);
                queued.extend(newer);
                Err(e)
            }
            Err(e) => {
                let keys: Vec<String> = batch.iter().map(|a| a.key.to_hex()).collect();
                warn!(source, error = %e, keys = %keys.join(","), "anchors rejected, dropping batch");
                Err(e)
            }
        }
    }

    /// Forget everything waiting for `source`.
    pub async fn discard(&self, source: &str) {
        self.pending.lock().await.remove(source);
    }

    /// Check anchors against the ledger.
    pub async fn verify(&self, anchors: &[Anchor]) -> Vec<Verification> {
        verify(&self.ledger, anchors).await
    }
}

impl<L> std::fmt::Debug for Anchorer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anchorer").finish_non_exhaustive()
    }
}

/// Ledger state of one anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    /// The ledger holds exactly this pair.
    Verified,
    /// The ledger holds a different value under the key.
    Mismatch { found: Hash },
    NotFound,
    /// The ledger could not answer.
    Unreachable,
}

/// Result of checking one anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub anchor: Anchor,
    pub status: AnchorStatus,
}

/// Look up each anchor and report its status.
pub async fn verify<L: LedgerClient + ?Sized>(ledger: &L, anchors: &[Anchor]) -> Vec<Verification> {
    let mut results = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        let status = match ledger.lookup(&anchor.key).await {
            Ok(Some(value)) if value == anchor.value => AnchorStatus::Verified,
            Ok(Some(found)) => AnchorStatus::Mismatch { found },
            Ok(None) => AnchorStatus::NotFound,
            Err(e) => {
                debug!(key = %anchor.key, error = %e, "anchor lookup failed");
                AnchorStatus::Unreachable
            }
        };
        results.push(Verification {
            anchor: *anchor,
            status,
        });
    }
    results
}

/// Whether every verification succeeded.
pub fn all_verified(results: &[Verification]) -> bool {
    results
        .iter()
        .all(|v| v.status == AnchorStatus::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use ownables_event_chain::{Account, Event, EventChain};
    use serde_json::json;

    fn anchor(k: u8, v: u8) -> Anchor {
        Anchor::new(Hash::new([k; 32]), Hash::new([v; 32]))
    }

    fn chain_of(n: usize) -> EventChain {
        let account = Account::from_seed([4u8; 32]);
        let mut chain = EventChain::create(&account);
        for i in 0..n {
            let event = Event::json(&json!({"@context": "execute_msg.json", "n": i})).unwrap();
            chain.add(event, &account).unwrap();
        }
        chain
    }

    #[tokio::test]
    async fn failed_submission_is_requeued() {
        let anchorer = Anchorer::new(MemoryLedger::new());
        anchorer.ledger().set_reachable(false);

        let err = anchorer
            .submit("a", [anchor(1, 2), anchor(2, 3)])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(anchorer.pending_for("a").await, 2);

        anchorer.ledger().set_reachable(true);
        let delivered = anchorer.submit("a", [anchor(3, 4)]).await.unwrap();
        assert_eq!(delivered, vec![anchor(1, 2), anchor(2, 3), anchor(3, 4)]);
        assert_eq!(anchorer.pending().await, 0);
        assert_eq!(anchorer.ledger().len(), 3);
    }

    #[tokio::test]
    async fn pending_anchors_are_not_duplicated() {
        let anchorer = Anchorer::new(MemoryLedger::new());
        anchorer.enqueue("a", [anchor(1, 2)]).await;
        anchorer.enqueue("a", [anchor(1, 2), anchor(2, 3)]).await;
        anchorer.enqueue("b", [anchor(1, 2)]).await;
        assert_eq!(anchorer.pending_for("a").await, 2);
        assert_eq!(anchorer.pending().await, 3);
        assert_eq!(anchorer.sources().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn delivering_nothing_skips_the_ledger() {
        let anchorer = Anchorer::new(MemoryLedger::new());
        assert!(anchorer.deliver("a").await.unwrap().is_empty());
        anchorer.enqueue("a", Vec::<Anchor>::new()).await;
        assert!(anchorer.sources().await.is_empty());
        assert_eq!(anchorer.ledger().submissions(), 0);
    }

    #[tokio::test]
    async fn rejected_batch_is_dropped_and_blocks_no_one() {
        let anchorer = Anchorer::new(MemoryLedger::new());
        anchorer.ledger().anchor(&[anchor(1, 2)]).await.unwrap();

        let err = anchorer.submit("a", [anchor(1, 7)]).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(anchorer.pending_for("a").await, 0);

        for (source, k) in [("b", 3), ("c", 5), ("a", 8)] {
            let delivered = anchorer.submit(source, [anchor(k, k + 1)]).await.unwrap();
            assert_eq!(delivered.len(), 1);
        }
        assert_eq!(anchorer.pending().await, 0);
        assert_eq!(anchorer.ledger().len(), 4);
    }

    #[tokio::test]
    async fn retryable_failure_of_one_source_keeps_others_apart() {
        let anchorer = Anchorer::new(MemoryLedger::new());
        anchorer.ledger().set_reachable(false);
        assert!(anchorer.submit("a", [anchor(1, 2)]).await.is_err());

        anchorer.ledger().set_reachable(true);
        let delivered = anchorer.submit("b", [anchor(3, 4)]).await.unwrap();
        assert_eq!(delivered, vec![anchor(3, 4)]);
        assert_eq!(anchorer.pending_for("a").await, 1);

        anchorer.discard("a").await;
        assert_eq!(anchorer.pending().await, 0);
    }

    #[tokio::test]
    async fn anchoring_after_checkpoint_submits_only_new_events() {
        let chain = chain_of(3);
        let events = chain.events();
        let checkpoint = events[0].hash.unwrap();

        let anchors = chain.starting_after(&checkpoint).anchor_map();
        assert_eq!(
            anchors,
            vec![
                Anchor::new(events[0].hash.unwrap(), events[1].hash.unwrap()),
                Anchor::new(events[1].hash.unwrap(), events[2].hash.unwrap()),
            ]
        );

        let anchorer = Anchorer::new(MemoryLedger::new());
        assert_eq!(anchorer.submit("chain", anchors).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn verify_reports_each_status() {
        let ledger = MemoryLedger::new();
        ledger.anchor(&[anchor(1, 2), anchor(5, 6)]).await.unwrap();

        let results = verify(&ledger, &[anchor(1, 2), anchor(5, 9), anchor(7, 8)]).await;
        let statuses: Vec<_> = results.iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![
                AnchorStatus::Verified,
                AnchorStatus::Mismatch {
                    found: Hash::new([6; 32])
                },
                AnchorStatus::NotFound,
            ]
        );
        assert!(!all_verified(&results));
        assert!(all_verified(&results[..1]));

        ledger.set_reachable(false);
        let results = verify(&ledger, &[anchor(1, 2)]).await;
        assert_eq!(results[0].status, AnchorStatus::Unreachable);
    }
}
