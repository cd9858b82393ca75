//! Signed and unsigned Nostr events.
//!
//! The pool never signs or verifies anything. It carries already-signed
//! events produced by a [`Signer`](crate::batch::Signer) and reads only the
//! fields it needs for routing (`id`, `kind`, `tags`).
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "<32-byte hex>",
//!   "pubkey": "<32-byte hex>",
//!   "created_at": 1700000000,
//!   "kind": 1,
//!   "tags": [["p", "<hex>"]],
//!   "content": "hello",
//!   "sig": "<64-byte hex>"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Kinds
// ============================================================================

/// Zap request kind (NIP-57).
pub const KIND_ZAP_REQUEST: u32 = 9734;

/// Remote signer (bunker) message kind (NIP-46).
pub const KIND_NOSTR_CONNECT: u32 = 24133;

/// Returns `true` for ephemeral kinds, which relays do not store.
#[inline]
#[must_use]
pub const fn is_ephemeral_kind(kind: u32) -> bool {
    kind >= 20_000 && kind < 30_000
}

// ============================================================================
// Event
// ============================================================================

/// A signed event as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id (hex sha256 of the serialized event).
    pub id: String,

    /// Author public key (hex).
    pub pubkey: String,

    /// Unix timestamp in seconds.
    pub created_at: u64,

    /// Event kind.
    pub kind: u32,

    /// Tag arrays.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,

    /// Event content.
    #[serde(default)]
    pub content: String,

    /// Schnorr signature (hex).
    pub sig: String,
}

impl Event {
    /// Parses an event from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the JSON is not an event.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the event to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns `true` if relays are not expected to acknowledge this event.
    #[inline]
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        is_ephemeral_kind(self.kind)
    }
}

// ============================================================================
// UnsignedEvent
// ============================================================================

/// Event template handed to a signer.
///
/// Incoming sign requests may carry an `id`, `pubkey` or `sig`; they are
/// ignored because the signer recomputes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    /// Unix timestamp in seconds.
    pub created_at: u64,

    /// Event kind.
    pub kind: u32,

    /// Tag arrays.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,

    /// Event content.
    #[serde(default)]
    pub content: String,
}

impl UnsignedEvent {
    /// Parses an event template from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if required fields are missing.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns `true` if this is a zap request marked anonymous.
    #[must_use]
    pub fn is_anonymous_zap(&self) -> bool {
        self.kind == KIND_ZAP_REQUEST && self.tags.iter().any(|tag| tag.iter().any(|t| t == "anon"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![vec!["p".into(), "c".repeat(64)], vec!["t".into(), "nostr".into()]],
            content: "hello".into(),
            sig: "d".repeat(128),
        }
    }

    #[test]
    fn test_ephemeral_range() {
        assert!(!is_ephemeral_kind(1));
        assert!(is_ephemeral_kind(20_000));
        assert!(is_ephemeral_kind(KIND_NOSTR_CONNECT));
        assert!(!is_ephemeral_kind(30_000));
    }

    #[test]
    fn test_event_json_shape() {
        let json = sample().to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["kind"], 1);
        assert_eq!(value["tags"][1][1], "nostr");
        assert_eq!(Event::from_json(&json).expect("parse"), sample());
    }

    #[test]
    fn test_unsigned_ignores_signature_fields() {
        let json = r#"{"id":"x","pubkey":"y","created_at":5,"kind":9734,"tags":[["anon"]],"content":"","sig":"z"}"#;
        let unsigned = UnsignedEvent::from_json(json).expect("parse");
        assert_eq!(unsigned.kind, KIND_ZAP_REQUEST);
        assert!(unsigned.is_anonymous_zap());
    }

    #[test]
    fn test_unsigned_requires_kind() {
        assert!(UnsignedEvent::from_json(r#"{"created_at":5}"#).is_err());
    }
}
