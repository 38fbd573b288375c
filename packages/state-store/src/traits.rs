//! Store traits.
//!
//! Instances own three logical partitions, all keyed by instance id: the
//! state dump, the chain record, and a cached last-applied event hash.
//! Every write replaces its partition wholesale.

use ownables_event_chain::Hash;

use crate::dump::StateDump;
use crate::error::Result;
use crate::record::ChainRecord;

/// Opaque per-instance memory snapshots.
pub trait StateDumpStore: Send + Sync {
    /// The instance's dump, or `None` if nothing was stored yet.
    fn get(&self, id: &str) -> Result<Option<StateDump>>;

    /// Replace the instance's dump.
    fn put(&self, id: &str, dump: &StateDump) -> Result<()>;

    fn remove(&self, id: &str) -> Result<()>;
}

/// Chain metadata and sync bookkeeping.
pub trait ChainStore: Send + Sync {
    fn load_chain(&self, id: &str) -> Result<Option<ChainRecord>>;

    fn save_chain(&self, id: &str, record: &ChainRecord) -> Result<()>;

    /// Hash of the last event replayed into the instance's sandbox.
    fn applied(&self, id: &str) -> Result<Option<Hash>>;

    fn set_applied(&self, id: &str, hash: &Hash) -> Result<()>;

    /// Ids of every stored instance, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Drop the chain record and applied hash.
    fn delete(&self, id: &str) -> Result<()>;
}

/// A store holding every partition.
///
/// Automatically implemented for any type implementing both traits.
pub trait Store: StateDumpStore + ChainStore {}
impl<T: StateDumpStore + ChainStore> Store for T {}

/// Reject ids that could escape a store's namespace.
pub fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(crate::error::StoreError::InvalidId(id.to_string()))
    }
}
