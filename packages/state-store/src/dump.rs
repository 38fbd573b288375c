//! State dumps: the opaque memory of a module instance.

use serde::{Deserialize, Serialize};

/// One key/value pair of module memory.
pub type Pair = (Vec<u8>, Vec<u8>);

/// An ordered snapshot of a module instance's memory.
///
/// Keys and values are opaque; the module defines its own layout. The JSON
/// form is `[[key, value], ...]` with keys and values as byte arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDump(Vec<Pair>);

impl StateDump {
    pub fn new(pairs: Vec<Pair>) -> Self {
        Self(pairs)
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.0
    }

    pub fn into_pairs(self) -> Vec<Pair> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pair> {
        self.0.iter()
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl FromIterator<Pair> for StateDump {
    fn from_iter<I: IntoIterator<Item = Pair>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for StateDump {
    type Item = Pair;
    type IntoIter = std::vec::IntoIter<Pair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
