//! Signing identities.

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};

use crate::binary::{PublicKey, Signature};

/// Key type tag written next to every public key.
pub const KEY_TYPE: &str = "ed25519";

/// An identity that can sign events.
///
/// Wallet integrations implement this; the chain never sees private keys.
pub trait Signer: Send + Sync {
    /// The public half of the identity.
    fn public_key(&self) -> PublicKey;

    /// Sign `message`.
    fn sign(&self, message: &[u8]) -> Signature;
}

/// A local ed25519 account.
pub struct Account {
    key: SigningKey,
}

impl Account {
    /// Build an account from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Generate a fresh random account.
    pub fn generate() -> Self {
        Self::from_seed(rand::random())
    }

    /// Hex address used as the message sender.
    pub fn address(&self) -> String {
        self.public_key().to_hex()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl Signer for Account {
    fn public_key(&self) -> PublicKey {
        PublicKey::new(self.key.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Signature::new(self.key.sign(message).to_bytes())
    }
}

/// Verify `signature` over `message` against `public_key`.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    key.verify_strict(message, &signature).is_ok()
}
