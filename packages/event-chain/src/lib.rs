//! # Event Chains
//!
//! Every ownable instance records its history as an event chain: an
//! append-only list of signed events, each linked to its predecessor by hash.
//!
//! ```text
//! sha256(id) <- E0 <- E1 <- E2   (latest_hash = hash(E2))
//!               ^ genesis, signed by the identity the id is derived from
//! ```
//!
//! - [`EventChain::add`] links, signs and appends one event.
//! - [`EventChain::starting_after`] / [`EventChain::starting_with`] cut
//!   partial chains for incremental anchoring and replay.
//! - [`EventChain::anchor_map`] derives one [`Anchor`] per event.
//! - Serialization is validated on the way in: a chain whose links,
//!   signatures or stored `state` disagree is rejected as a whole.
//!
//! # Example
//!
//! ```rust
//! use ownables_event_chain::{Account, Event, EventChain};
//! use serde_json::json;
//!
//! let account = Account::generate();
//! let mut chain = EventChain::create(&account);
//! chain
//!     .add(Event::json(&json!({"@context": "instantiate_msg.json"})).unwrap(), &account)
//!     .unwrap();
//!
//! let restored = EventChain::from_json(&chain.to_json().unwrap()).unwrap();
//! assert_eq!(restored.latest_hash(), chain.latest_hash());
//! ```

pub mod anchor;
pub mod binary;
pub mod chain;
pub mod error;
pub mod event;
pub mod signer;

pub use anchor::Anchor;
pub use binary::{ChainId, Hash, PublicKey, Signature};
pub use chain::{EventChain, Start};
pub use error::{ChainError, Result};
pub use event::{Event, KeyType, SignKey, CONTEXT_KEY, MEDIA_TYPE_JSON};
pub use signer::{verify, Account, Signer, KEY_TYPE};
