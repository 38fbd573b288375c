//! Events: immutable, signed records of one state-changing operation.
//!
//! An event is built unsigned, then linked and signed when it is added to a
//! chain. Its identity is `sha256(canonical_bytes || signature)`, so the hash
//! covers every field including the signature.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::binary::{Hash, PublicKey, Signature};
use crate::error::{ChainError, Result};
use crate::signer::{self, Signer, KEY_TYPE};

/// Media type for JSON payloads.
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// Key under which JSON payloads name their message kind.
pub const CONTEXT_KEY: &str = "@context";

/// Public key of an event signer, tagged with its key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignKey {
    #[serde(rename = "keyType")]
    pub key_type: KeyType,
    #[serde(rename = "publicKey")]
    pub public_key: PublicKey,
}

/// Supported signature schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
}

impl KeyType {
    fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => KEY_TYPE,
        }
    }
}

/// A single chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,

    /// Hash of the preceding event, or the chain's genesis sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Hash>,

    #[serde(rename = "mediaType")]
    pub media_type: String,

    #[serde(with = "base64_data")]
    pub data: Vec<u8>,

    #[serde(rename = "signKey", default, skip_serializing_if = "Option::is_none")]
    pub sign_key: Option<SignKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
}

impl Event {
    /// Create an unsigned event stamped with the current time.
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self {
            timestamp: now,
            previous: None,
            media_type: media_type.into(),
            data,
            sign_key: None,
            signature: None,
            hash: None,
        }
    }

    /// Create an unsigned `application/json` event.
    pub fn json(value: &JsonValue) -> Result<Self> {
        Ok(Self::new(MEDIA_TYPE_JSON, serde_json::to_vec(value)?))
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Canonical byte encoding (sign input).
    ///
    /// Layout: `[timestamp (8 LE)] [previous (32)] [key type len (4 LE)] [key type]
    /// [public key (32)] [media type len (4 LE)] [media type] [data len (4 LE)] [data]`.
    /// Missing fields encode as zeros.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let key_type = self
            .sign_key
            .map(|k| k.key_type.as_str())
            .unwrap_or_default();
        let public_key = self
            .sign_key
            .map(|k| *k.public_key.as_bytes())
            .unwrap_or([0u8; 32]);
        let previous = self.previous.map(|h| *h.as_bytes()).unwrap_or([0u8; 32]);

        let mut out = Vec::with_capacity(
            8 + 32 + 4 + key_type.len() + 32 + 4 + self.media_type.len() + 4 + self.data.len(),
        );
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&previous);
        push_prefixed(&mut out, key_type.as_bytes());
        out.extend_from_slice(&public_key);
        push_prefixed(&mut out, self.media_type.as_bytes());
        push_prefixed(&mut out, &self.data);
        out
    }

    /// Recompute the event hash from its contents. `None` while unsigned.
    pub fn compute_hash(&self) -> Option<Hash> {
        let signature = self.signature?;
        Some(Hash::digest_parts(&[
            &self.canonical_bytes(),
            signature.as_ref(),
        ]))
    }

    /// Link to `previous`, sign with `signer` and seal the hash.
    pub(crate) fn seal(&mut self, previous: Hash, signer: &dyn Signer) {
        self.previous = Some(previous);
        self.sign_key = Some(SignKey {
            key_type: KeyType::Ed25519,
            public_key: signer.public_key(),
        });
        self.signature = Some(signer.sign(&self.canonical_bytes()));
        self.hash = self.compute_hash();
    }

    /// Whether the event carries a signature that verifies against its signer key.
    pub fn verify_signature(&self) -> bool {
        match (self.sign_key, self.signature) {
            (Some(key), Some(signature)) => {
                signer::verify(&key.public_key, &self.canonical_bytes(), &signature)
            }
            _ => false,
        }
    }

    /// Whether the event has been signed and sealed.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.hash.is_some()
    }

    /// Public key of the signer, if signed.
    pub fn signer(&self) -> Option<PublicKey> {
        self.sign_key.map(|k| k.public_key)
    }

    /// Parse the payload as JSON.
    pub fn parsed_data(&self) -> Result<JsonValue> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// The payload's `@context` discriminator, if it is a JSON object carrying one.
    pub fn context(&self) -> Option<String> {
        if self.media_type != MEDIA_TYPE_JSON {
            return None;
        }
        self.parsed_data()
            .ok()?
            .get(CONTEXT_KEY)?
            .as_str()
            .map(str::to_string)
    }

    /// Sealed hash, or an error naming the event's position.
    pub(crate) fn sealed_hash(&self, index: usize) -> Result<Hash> {
        self.hash.ok_or(ChainError::BadSignature { index })
    }
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

mod base64_data {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Account;
    use serde_json::json;

    fn signed_event() -> Event {
        let account = Account::from_seed([5u8; 32]);
        let msg = json!({"@context": "execute_msg.json", "transfer": {"to": "bob"}});
        let mut event = Event::json(&msg)
            .unwrap()
            .with_timestamp(1_700_000_000_000);
        event.seal(Hash::new([1u8; 32]), &account);
        event
    }

    #[test]
    fn seal_signs_and_hashes() {
        let event = signed_event();
        assert!(event.is_signed());
        assert!(event.verify_signature());
        assert_eq!(event.hash, event.compute_hash());
        assert_eq!(event.previous, Some(Hash::new([1u8; 32])));
    }

    #[test]
    fn unsigned_event_has_no_hash() {
        let event = Event::new("text/plain", b"hi".to_vec());
        assert!(!event.is_signed());
        assert!(!event.verify_signature());
        assert_eq!(event.compute_hash(), None);
    }

    #[test]
    fn tampered_data_fails_signature() {
        let mut event = signed_event();
        event.data.push(b' ');
        assert!(!event.verify_signature());
        assert_ne!(event.hash, event.compute_hash());
    }

    #[test]
    fn context_is_read_from_json_payload() {
        assert_eq!(signed_event().context().as_deref(), Some("execute_msg.json"));

        let plain = Event::new("text/plain", b"{\"@context\":\"x\"}".to_vec());
        assert_eq!(plain.context(), None);
    }

    #[test]
    fn serde_round_trip_preserves_signature() {
        let event = signed_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"mediaType\":\"application/json\""));
        assert!(json.contains("\"keyType\":\"ed25519\""));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert!(back.verify_signature());
    }
}
