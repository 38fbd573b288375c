//! Anchors: `(previous, hash)` pairs submitted to an external ledger.

use serde::{Deserialize, Serialize};

use crate::binary::Hash;

/// A key/value pair proving that a chain passed from `key` to `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor {
    pub key: Hash,
    pub value: Hash,
}

impl Anchor {
    pub fn new(key: Hash, value: Hash) -> Self {
        Self { key, value }
    }
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.key, self.value)
    }
}
