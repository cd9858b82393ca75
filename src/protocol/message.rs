//! Client and relay frames (NIP-01 JSON arrays).
//!
//! | Direction | Frame |
//! |-----------|-------|
//! | Client → Relay | `["EVENT", event]`, `["REQ", sub, filter...]`, `["CLOSE", sub]`, `["AUTH", event]` |
//! | Relay → Client | `["EVENT", sub, event]`, `["OK", id, bool, msg]`, `["EOSE", sub]`, `["CLOSED", sub, msg]`, `["NOTICE", msg]`, `["AUTH", challenge]` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;

use super::{Event, Filter};

// ============================================================================
// ClientMessage
// ============================================================================

/// Frames sent from the client to a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Publish an event.
    Event(Event),

    /// Open or replace a subscription.
    Req {
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Filters, OR-ed by the relay.
        filters: Vec<Filter>,
    },

    /// Cancel a subscription.
    Close(SubscriptionId),

    /// Answer an authentication challenge (NIP-42).
    Auth(Event),
}

impl ClientMessage {
    /// Serializes the frame to its JSON array form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if an event or filter fails to serialize.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = Vec::with_capacity(filters.len() + 2);
                frame.push(Value::from("REQ"));
                frame.push(Value::from(subscription_id.as_str()));
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
            Self::Auth(event) => json!(["AUTH", event]),
        };
        Ok(value.to_string())
    }

    /// Returns the frame label, for logging.
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Event(_) => "EVENT",
            Self::Req { .. } => "REQ",
            Self::Close(_) => "CLOSE",
            Self::Auth(_) => "AUTH",
        }
    }
}

// ============================================================================
// RelayMessage
// ============================================================================

/// Frames received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Event matching a subscription.
    Event {
        /// Subscription the event belongs to.
        subscription_id: SubscriptionId,
        /// The event.
        event: Event,
    },

    /// Publish acknowledgment.
    Ok {
        /// Acknowledged event id.
        event_id: String,
        /// Whether the relay accepted the event.
        success: bool,
        /// Relay message (prefix-coded on rejection).
        message: String,
    },

    /// End of stored events for a subscription.
    Eose(SubscriptionId),

    /// Subscription closed by the relay.
    Closed {
        /// Closed subscription.
        subscription_id: SubscriptionId,
        /// Reason.
        message: String,
    },

    /// Human-readable notice.
    Notice(String),

    /// Authentication challenge (NIP-42).
    Auth(String),
}

impl RelayMessage {
    /// Parses a relay frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for malformed or unknown frames and
    /// [`Error::Json`] if an embedded event is invalid.
    pub fn from_json(text: &str) -> Result<Self> {
        let frame: Vec<Value> = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("frame is not a JSON array: {e}")))?;

        let label = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("frame label missing"))?;

        match label {
            "EVENT" => {
                let subscription_id = string_at(&frame, 1, "subscription id")?;
                let event = frame
                    .get(2)
                    .cloned()
                    .ok_or_else(|| Error::protocol("EVENT frame missing event"))?;
                Ok(Self::Event {
                    subscription_id: SubscriptionId::new(subscription_id),
                    event: serde_json::from_value(event)?,
                })
            }
            "OK" => {
                let event_id = string_at(&frame, 1, "event id")?;
                let success = frame
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| Error::protocol("OK frame missing status"))?;
                let message = frame.get(3).and_then(Value::as_str).unwrap_or_default();
                Ok(Self::Ok {
                    event_id: event_id.to_string(),
                    success,
                    message: message.to_string(),
                })
            }
            "EOSE" => {
                let subscription_id = string_at(&frame, 1, "subscription id")?;
                Ok(Self::Eose(SubscriptionId::new(subscription_id)))
            }
            "CLOSED" => {
                let subscription_id = string_at(&frame, 1, "subscription id")?;
                let message = frame.get(2).and_then(Value::as_str).unwrap_or_default();
                Ok(Self::Closed {
                    subscription_id: SubscriptionId::new(subscription_id),
                    message: message.to_string(),
                })
            }
            "NOTICE" => Ok(Self::Notice(string_at(&frame, 1, "notice")?.to_string())),
            "AUTH" => Ok(Self::Auth(string_at(&frame, 1, "challenge")?.to_string())),
            other => Err(Error::protocol(format!("unknown frame label: {other}"))),
        }
    }
}

/// Reads a string element of a frame.
fn string_at<'a>(frame: &'a [Value], index: usize, what: &str) -> Result<&'a str> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol(format!("frame missing {what}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event_json() -> Value {
        json!({
            "id": "ab".repeat(32),
            "pubkey": "cd".repeat(32),
            "created_at": 1,
            "kind": 1,
            "tags": [],
            "content": "hi",
            "sig": "ef".repeat(64),
        })
    }

    #[test]
    fn test_req_frame() {
        let msg = ClientMessage::Req {
            subscription_id: SubscriptionId::new("sub"),
            filters: vec![Filter::new().kinds([1]), Filter::new().limit(5)],
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!(["REQ", "sub", {"kinds": [1]}, {"limit": 5}]));
        assert_eq!(msg.label(), "REQ");
    }

    #[test]
    fn test_close_frame() {
        let msg = ClientMessage::Close(SubscriptionId::new("sub"));
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub"]"#);
    }

    #[test]
    fn test_parse_event() {
        let text = json!(["EVENT", "sub", event_json()]).to_string();
        match RelayMessage::from_json(&text).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id.as_str(), "sub");
                assert_eq!(event.content, "hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_ok_without_message() {
        let msg = RelayMessage::from_json(r#"["OK","abc",false]"#).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Ok {
                event_id: "abc".into(),
                success: false,
                message: String::new(),
            }
        );
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            RelayMessage::from_json(r#"["EOSE","s"]"#).unwrap(),
            RelayMessage::Eose(SubscriptionId::new("s"))
        );
        assert_eq!(
            RelayMessage::from_json(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice("slow down".into())
        );
        assert_eq!(
            RelayMessage::from_json(r#"["AUTH","challenge"]"#).unwrap(),
            RelayMessage::Auth("challenge".into())
        );
        assert!(matches!(
            RelayMessage::from_json(r#"["CLOSED","s","auth-required: x"]"#).unwrap(),
            RelayMessage::Closed { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            RelayMessage::from_json("{}"),
            Err(Error::Protocol { .. })
        ));
        assert!(RelayMessage::from_json("[]").is_err());
        assert!(RelayMessage::from_json(r#"["COUNT","s",{"count":1}]"#).is_err());
        assert!(RelayMessage::from_json(r#"["OK","abc"]"#).is_err());
        assert!(matches!(
            RelayMessage::from_json(r#"["EVENT","s",{"id":1}]"#),
            Err(Error::Json(_))
        ));
    }
}
