//! The ledger client seam.

use async_trait::async_trait;
use ownables_event_chain::{Anchor, Hash};

use crate::error::Result;

/// A ledger that records anchors and answers lookups by key.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit anchors in order.
    async fn anchor(&self, anchors: &[Anchor]) -> Result<()>;

    /// The value anchored under `key`, if any.
    async fn lookup(&self, key: &Hash) -> Result<Option<Hash>>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for Box<T> {
    async fn anchor(&self, anchors: &[Anchor]) -> Result<()> {
        (**self).anchor(anchors).await
    }

    async fn lookup(&self, key: &Hash) -> Result<Option<Hash>> {
        (**self).lookup(key).await
    }
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for std::sync::Arc<T> {
    async fn anchor(&self, anchors: &[Anchor]) -> Result<()> {
        (**self).anchor(anchors).await
    }

    async fn lookup(&self, key: &Hash) -> Result<Option<Hash>> {
        (**self).lookup(key).await
    }
}
