//! Error types for event chains.

use thiserror::Error;

use crate::binary::Hash;

/// Errors raised while building, extending or loading an event chain.
///
/// Every variant except `Decode` and `Json` means the chain can no longer be
/// trusted: the caller must surface it, never repair it.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The genesis event must be signed by the identity the chain id is bound to.
    #[error("signer is not the originator of this chain")]
    NotASigner,

    /// The chain has no known predecessor to link a new event to.
    #[error("partial chain is detached from its predecessor")]
    Detached,

    /// Full-history validation requested on a partial chain.
    #[error("partial chain cannot be validated back to genesis")]
    Partial,

    /// An event's declared predecessor does not match the previous event.
    #[error("event {index} links to {found}, expected {expected}")]
    BrokenLink {
        index: usize,
        expected: Hash,
        found: Hash,
    },

    /// An event's stored hash does not match its contents.
    #[error("event {index} hash mismatch")]
    HashMismatch { index: usize },

    /// An event is unsigned or its signature does not verify.
    #[error("event {index} has a missing or invalid signature")]
    BadSignature { index: usize },

    /// The genesis event was signed by a key the chain id was not derived from.
    #[error("genesis event is not signed by the chain's creator")]
    NotCreatedBy,

    /// The persisted running state differs from the recomputed one.
    #[error("chain state mismatch: stored {expected}, computed {found}")]
    StateMismatch { expected: Hash, found: Hash },

    /// The chain id is malformed.
    #[error("invalid chain id")]
    InvalidId,

    /// Malformed binary field.
    #[error("decode error: {0}")]
    Decode(String),

    /// Malformed JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
