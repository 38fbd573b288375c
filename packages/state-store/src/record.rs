//! Chain metadata persisted next to each instance's state dump.

use chrono::{DateTime, Utc};
use ownables_event_chain::{ChainError, EventChain, Hash};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Everything the host keeps about an instance besides its memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainRecord {
    pub chain: EventChain,

    /// Running state hash of `chain` when it was persisted.
    pub state: Hash,

    #[serde(rename = "latestHash")]
    pub latest_hash: Hash,

    /// Content id of the package the instance runs.
    pub package: String,

    pub created: DateTime<Utc>,

    /// Head of the last successfully anchored prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored: Option<Hash>,
}

/// Wire form with the chain left unparsed, so chain validation errors keep
/// their type.
#[derive(Deserialize)]
struct RawRecord {
    chain: serde_json::Value,
    state: Hash,
    #[serde(rename = "latestHash")]
    latest_hash: Hash,
    package: String,
    created: DateTime<Utc>,
    #[serde(default)]
    anchored: Option<Hash>,
}

impl ChainRecord {
    pub fn new(chain: EventChain, package: impl Into<String>) -> Self {
        Self {
            state: chain.state(),
            latest_hash: chain.latest_hash(),
            chain,
            package: package.into(),
            created: Utc::now(),
            anchored: None,
        }
    }

    /// Replace the chain and refresh the derived hashes.
    pub fn set_chain(&mut self, chain: EventChain) {
        self.state = chain.state();
        self.latest_hash = chain.latest_hash();
        self.chain = chain;
    }

    /// Check that the stored hashes match the chain.
    pub fn check(&self) -> std::result::Result<(), ChainError> {
        let state = self.chain.state();
        if state != self.state {
            return Err(ChainError::StateMismatch {
                expected: self.state,
                found: state,
            });
        }
        let latest = self.chain.latest_hash();
        if latest != self.latest_hash {
            return Err(ChainError::StateMismatch {
                expected: self.latest_hash,
                found: latest,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a record and validate its chain.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawRecord = serde_json::from_str(json)?;
        let record = ChainRecord {
            chain: EventChain::from_value(raw.chain)?,
            state: raw.state,
            latest_hash: raw.latest_hash,
            package: raw.package,
            created: raw.created,
            anchored: raw.anchored,
        };
        record.check()?;
        Ok(record)
    }
}
