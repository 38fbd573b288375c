//! # Ownables Anchoring
//!
//! Binds event chain hashes to an external ledger. Each anchor is a
//! `(previous, hash)` pair taken from [`EventChain::anchor_map`]; once on the
//! ledger it proves the chain passed through that link.
//!
//! - [`LedgerClient`] is the seam to the ledger; [`HttpLedger`] talks to one
//!   over HTTP and [`MemoryLedger`] keeps anchors in memory.
//! - [`Anchorer`] queues anchors per chain and keeps batches that failed
//!   for a retryable reason, so an unreachable ledger never blocks local
//!   operations. Rejected batches are dropped.
//! - [`verify`] reports each anchor as verified, mismatched, missing or
//!   unreachable.
//!
//! [`EventChain::anchor_map`]: ownables_event_chain::EventChain::anchor_map

mod anchorer;
mod error;
mod http;
mod ledger;
mod memory;

pub use anchorer::{all_verified, verify, AnchorStatus, Anchorer, Verification};
pub use error::{AnchorError, Result};
pub use http::HttpLedger;
pub use ledger::LedgerClient;
pub use memory::MemoryLedger;
