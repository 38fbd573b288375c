//! Fixed-width binary values: hashes, keys, signatures and chain ids.
//!
//! All of them display and serialize as lowercase hex so that persisted
//! chains stay readable and diffable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ChainError;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LEN: usize = $len;

            /// Wrap raw bytes.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Copy from a slice, failing when the length is wrong.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, ChainError> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    ChainError::Decode(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            /// Lowercase hex encoding.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex, tolerating a `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self, ChainError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)
                    .map_err(|e| ChainError::Decode(format!("bad hex: {}", e)))?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ChainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// A SHA-256 digest.
    Hash,
    32
);

fixed_bytes!(
    /// An ed25519 public key.
    PublicKey,
    32
);

fixed_bytes!(
    /// An ed25519 signature.
    Signature,
    64
);

fixed_bytes!(
    /// Self-certifying chain identifier.
    ///
    /// Layout: `[version (1)] [nonce (8)] [sha256(public_key || nonce)[..20]] [checksum (4)]`.
    ChainId,
    33
);

impl Hash {
    /// SHA-256 of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// SHA-256 over several parts, without intermediate allocation.
    pub fn digest_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }
}

/// Version byte for chain ids.
pub const CHAIN_ID_VERSION: u8 = 0x41;

const NONCE_LEN: usize = 8;
const KEY_DIGEST_LEN: usize = 20;

impl ChainId {
    /// Derive an id bound to `public_key` with the given nonce.
    pub fn derive(public_key: &PublicKey, nonce: [u8; NONCE_LEN]) -> Self {
        let key_digest = Hash::digest_parts(&[public_key.as_ref(), &nonce]);

        let mut out = [0u8; 33];
        out[0] = CHAIN_ID_VERSION;
        out[1..1 + NONCE_LEN].copy_from_slice(&nonce);
        out[1 + NONCE_LEN..1 + NONCE_LEN + KEY_DIGEST_LEN]
            .copy_from_slice(&key_digest.as_bytes()[..KEY_DIGEST_LEN]);

        let checksum = Hash::digest(&out[..29]);
        out[29..].copy_from_slice(&checksum.as_bytes()[..4]);
        Self(out)
    }

    /// The nonce embedded in the id.
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&self.0[1..1 + NONCE_LEN]);
        nonce
    }

    /// Whether the id was derived from `public_key`.
    pub fn is_derived_from(&self, public_key: &PublicKey) -> bool {
        Self::derive(public_key, self.nonce()) == *self
    }

    /// Whether the version byte and checksum are intact.
    pub fn is_well_formed(&self) -> bool {
        let checksum = Hash::digest(&self.0[..29]);
        self.0[0] == CHAIN_ID_VERSION && self.0[29..] == checksum.as_bytes()[..4]
    }
}
