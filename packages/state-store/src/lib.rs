//! # Ownables State Store
//!
//! Durable, per-instance storage for ownable modules. Each instance has three
//! partitions keyed by its id:
//!
//! - the [`StateDump`]: the module's raw memory, treated as opaque bytes
//! - the [`ChainRecord`]: the event chain plus its state and head hashes,
//!   package id, creation time and anchoring checkpoint
//! - the last-applied event hash, used for incremental replay
//!
//! Writes replace a partition wholesale. Callers that update both the dump
//! and the chain must write the dump first, so the chain head never points at
//! memory that was not persisted.
//!
//! # Example
//!
//! ```rust
//! use ownables_state_store::{MemoryStore, StateDump, StateDumpStore};
//!
//! let store = MemoryStore::new();
//! store.put("41ab", &StateDump::new(vec![(b"k".to_vec(), b"v".to_vec())])).unwrap();
//! assert_eq!(store.get("41ab").unwrap().unwrap().len(), 1);
//! ```

mod disk;
mod dump;
mod error;
mod memory;
mod record;
mod traits;

pub use disk::DiskStore;
pub use dump::{Pair, StateDump};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use record::ChainRecord;
pub use traits::{validate_id, ChainStore, StateDumpStore, Store};
