//! Event chains: hash-linked, signed, append-only logs.
//!
//! A chain is a singly linked list from its genesis sentinel to its head.
//! Chains received from a third party may start at an arbitrary event; such
//! partial chains can be extended forward but never validated back to genesis.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anchor::Anchor;
use crate::binary::{ChainId, Hash, PublicKey};
use crate::error::{ChainError, Result};
use crate::event::Event;
use crate::signer::Signer;

/// Where a chain's history begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// The chain holds its full history from the genesis event.
    Genesis,
    /// The chain continues after the given (not included) event hash.
    After(Hash),
    /// The chain has no known predecessor and cannot be extended.
    Detached,
}

impl Start {
    fn is_genesis(&self) -> bool {
        matches!(self, Start::Genesis)
    }
}

/// An ordered, hash-linked sequence of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChainJson", into = "ChainJson")]
pub struct EventChain {
    id: ChainId,
    events: Vec<Event>,
    start: Start,
}

impl EventChain {
    /// Create an empty chain bound to `signer`'s identity.
    pub fn create(signer: &dyn Signer) -> Self {
        Self::create_with_nonce(&signer.public_key(), rand::random())
    }

    /// Create an empty chain bound to `public_key` with an explicit nonce.
    pub fn create_with_nonce(public_key: &PublicKey, nonce: [u8; 8]) -> Self {
        Self {
            id: ChainId::derive(public_key, nonce),
            events: Vec::new(),
            start: Start::Genesis,
        }
    }

    /// Reassemble a chain from parts. No validation is performed.
    pub fn from_parts(id: ChainId, events: Vec<Event>, start: Start) -> Self {
        Self { id, events, start }
    }

    pub fn id(&self) -> &ChainId {
        &self.id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn start(&self) -> Start {
        self.start
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the chain lacks history back to genesis.
    pub fn is_partial(&self) -> bool {
        !self.start.is_genesis()
    }

    /// Whether the chain id was derived from `public_key`.
    pub fn is_created_by(&self, public_key: &PublicKey) -> bool {
        self.id.is_derived_from(public_key)
    }

    /// The genesis sentinel: what the first event's `previous` points at.
    pub fn initial_hash(&self) -> Hash {
        Hash::digest(self.id.as_bytes())
    }

    /// Hash the next event must link to.
    ///
    /// For a detached chain with no events this is the genesis sentinel, but
    /// `add` refuses to use it.
    pub fn latest_hash(&self) -> Hash {
        if let Some(hash) = self.events.last().and_then(|e| e.hash) {
            return hash;
        }
        match self.start {
            Start::After(base) => base,
            Start::Genesis | Start::Detached => self.initial_hash(),
        }
    }

    fn seed(&self) -> Hash {
        match self.start {
            Start::After(base) => base,
            Start::Genesis => self.initial_hash(),
            Start::Detached => self
                .events
                .first()
                .and_then(|e| e.previous)
                .unwrap_or_else(|| self.initial_hash()),
        }
    }

    /// Running hash over all event hashes, a cheap version fingerprint.
    pub fn state(&self) -> Hash {
        self.events
            .iter()
            .filter_map(|e| e.hash)
            .fold(self.seed(), |state, hash| {
                Hash::digest_parts(&[state.as_ref(), hash.as_ref()])
            })
    }

    /// Link `event` to the head, sign it with `signer` and append it.
    pub fn add(&mut self, mut event: Event, signer: &dyn Signer) -> Result<&Event> {
        match self.start {
            Start::Detached => return Err(ChainError::Detached),
            Start::After(base) => {
                if let Some(first) = self.events.first() {
                    if first.previous != Some(base) {
                        return Err(ChainError::Detached);
                    }
                }
            }
            Start::Genesis => {
                if self.events.is_empty() && !self.is_created_by(&signer.public_key()) {
                    return Err(ChainError::NotASigner);
                }
            }
        }

        event.seal(self.latest_hash(), signer);
        debug!(chain = %self.id, index = self.events.len(), "event added");
        self.events.push(event);
        Ok(self.head())
    }

    /// Append an event that was signed elsewhere.
    pub fn append_signed(&mut self, event: Event) -> Result<()> {
        let index = self.events.len();
        if self.start == Start::Detached && self.events.is_empty() {
            return Err(ChainError::Detached);
        }

        self.check_event(index, &event, self.latest_hash())?;
        self.events.push(event);
        Ok(())
    }

    /// Append every event of `partial` in order.
    ///
    /// Events already present are skipped, so overlapping suffixes are fine.
    pub fn extend(&mut self, partial: &EventChain) -> Result<usize> {
        let mut appended = 0;
        for event in &partial.events {
            if event.hash.is_some() && self.events.iter().any(|e| e.hash == event.hash) {
                continue;
            }
            self.append_signed(event.clone())?;
            appended += 1;
        }
        Ok(appended)
    }

    fn head(&self) -> &Event {
        &self.events[self.events.len() - 1]
    }

    fn check_event(&self, index: usize, event: &Event, expected_previous: Hash) -> Result<Hash> {
        if !event.verify_signature() {
            return Err(ChainError::BadSignature { index });
        }
        let hash = event.sealed_hash(index)?;
        if event.compute_hash() != Some(hash) {
            return Err(ChainError::HashMismatch { index });
        }

        let found = event.previous.ok_or(ChainError::BadSignature { index })?;
        if found != expected_previous {
            return Err(ChainError::BrokenLink {
                index,
                expected: expected_previous,
                found,
            });
        }

        if index == 0 && self.start.is_genesis() {
            let signer = event.signer().ok_or(ChainError::BadSignature { index })?;
            if !self.is_created_by(&signer) {
                return Err(ChainError::NotCreatedBy);
            }
        }
        Ok(hash)
    }

    /// Validate the full history from genesis.
    pub fn validate(&self) -> Result<()> {
        if self.is_partial() {
            return Err(ChainError::Partial);
        }
        self.validate_links()
    }

    /// Validate every event that is present: links, signatures and hashes.
    ///
    /// Fails closed on the first mismatch.
    pub fn validate_links(&self) -> Result<()> {
        if !self.id.is_well_formed() {
            return Err(ChainError::InvalidId);
        }

        let mut previous = self.seed();
        for (index, event) in self.events.iter().enumerate() {
            previous = self.check_event(index, event, previous)?;
        }
        Ok(())
    }

    /// Events after `hash`, as a partial chain.
    ///
    /// Empty when `hash` is the head or is unknown.
    pub fn starting_after(&self, hash: &Hash) -> EventChain {
        if *hash == self.latest_hash() {
            return self.suffix(self.events.len(), Start::After(*hash));
        }
        if *hash == self.seed() {
            return self.suffix(0, self.start);
        }
        match self.position(hash) {
            Some(i) => self.suffix(i + 1, Start::After(*hash)),
            None => self.suffix(self.events.len(), Start::Detached),
        }
    }

    /// Events from `hash` onwards, including the event itself.
    ///
    /// Empty when `hash` is unknown.
    pub fn starting_with(&self, hash: &Hash) -> EventChain {
        match self.position(hash) {
            Some(0) => self.suffix(0, self.start),
            Some(i) => {
                let base = self.events[i].previous.map_or(Start::Detached, Start::After);
                self.suffix(i, base)
            }
            None => self.suffix(self.events.len(), Start::Detached),
        }
    }

    fn position(&self, hash: &Hash) -> Option<usize> {
        self.events.iter().position(|e| e.hash.as_ref() == Some(hash))
    }

    fn suffix(&self, from: usize, start: Start) -> EventChain {
        EventChain {
            id: self.id,
            events: self.events[from..].to_vec(),
            start,
        }
    }

    /// One `{previous, hash}` anchor per event.
    pub fn anchor_map(&self) -> Vec<Anchor> {
        self.events
            .iter()
            .filter_map(|e| {
                Some(Anchor {
                    key: e.previous?,
                    value: e.hash?,
                })
            })
            .collect()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse and validate a chain from JSON.
    ///
    /// Integrity failures keep their [`ChainError`] variant instead of being
    /// folded into a JSON error.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: ChainJson = serde_json::from_str(json)?;
        raw.try_into()
    }

    /// Parse and validate a chain from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: ChainJson = serde_json::from_value(value)?;
        raw.try_into()
    }
}

/// Persisted JSON shape of a chain.
#[derive(Serialize, Deserialize)]
struct ChainJson {
    id: ChainId,
    events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partial: Option<PartialJson>,
    state: Hash,
    #[serde(rename = "latestHash")]
    latest_hash: Hash,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PartialJson {
    After(Hash),
    Detached,
}

impl From<EventChain> for ChainJson {
    fn from(chain: EventChain) -> Self {
        let state = chain.state();
        let latest_hash = chain.latest_hash();
        let partial = match chain.start {
            Start::Genesis => None,
            Start::After(hash) => Some(PartialJson::After(hash)),
            Start::Detached => Some(PartialJson::Detached),
        };
        ChainJson {
            id: chain.id,
            events: chain.events,
            partial,
            state,
            latest_hash,
        }
    }
}

impl TryFrom<ChainJson> for EventChain {
    type Error = ChainError;

    fn try_from(json: ChainJson) -> Result<Self> {
        let start = match json.partial {
            None => Start::Genesis,
            Some(PartialJson::After(hash)) => Start::After(hash),
            Some(PartialJson::Detached) => Start::Detached,
        };
        let chain = EventChain {
            id: json.id,
            events: json.events,
            start,
        };

        chain.validate_links()?;
        let state = chain.state();
        if state != json.state {
            return Err(ChainError::StateMismatch {
                expected: json.state,
                found: state,
            });
        }
        let latest = chain.latest_hash();
        if latest != json.latest_hash {
            return Err(ChainError::StateMismatch {
                expected: json.latest_hash,
                found: latest,
            });
        }
        Ok(chain)
    }
}

impl std::fmt::Display for Start {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Start::Genesis => write!(f, "genesis"),
            Start::After(hash) => write!(f, "after {}", hash),
            Start::Detached => write!(f, "detached"),
        }
    }
}
