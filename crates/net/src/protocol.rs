//! Wire protocol message types
//!
//! All envelopes are JSON-serialized: length-prefixed on a stream
//! transport, one envelope per datagram on a datagram transport.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single application message as transmitted on the wire.
///
/// The `id` on outbound variants is assigned by the relay at broadcast
/// time; inbound envelopes never carry one. Ids are unique and strictly
/// increasing per relay instance, but datagram delivery is unordered, so
/// they are a display order only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Peer announces itself with a display name
    Register { name: String },

    /// Chat message relayed between peers
    #[serde(rename = "message")]
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        text: String,
        sender: String,
        time: i64,
    },

    /// Relay-generated notice (join/leave)
    System {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        text: String,
        time: i64,
    },
}

impl Envelope {
    /// Build a chat envelope stamped with the current time
    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Envelope::Chat {
            id: None,
            text: text.into(),
            sender: sender.into(),
            time: now(),
        }
    }

    /// Build a system notice stamped with the current time
    pub fn system(text: impl Into<String>) -> Self {
        Envelope::System {
            id: None,
            text: text.into(),
            time: now(),
        }
    }

    /// Attach the relay-assigned sequence id (no-op for `Register`)
    pub fn with_id(mut self, sequence: u64) -> Self {
        match &mut self {
            Envelope::Chat { id, .. } | Envelope::System { id, .. } => *id = Some(sequence),
            Envelope::Register { .. } => {}
        }
        self
    }

    /// The relay-assigned sequence id, if any
    pub fn id(&self) -> Option<u64> {
        match self {
            Envelope::Chat { id, .. } | Envelope::System { id, .. } => *id,
            Envelope::Register { .. } => None,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Current wall-clock time as epoch seconds
pub fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_variants() {
        let envelopes = [
            Envelope::Register {
                name: "alice".to_string(),
            },
            Envelope::chat("alice", "hi").with_id(7),
            Envelope::chat("bob", "no id yet"),
            Envelope::system("alice joined").with_id(1),
        ];

        for envelope in envelopes {
            let bytes = envelope.to_bytes().unwrap();
            let decoded = Envelope::from_bytes(&bytes).unwrap();
            assert_eq!(envelope, decoded);
        }
    }

    #[test]
    fn test_wire_field_names() {
        let envelope = Envelope::Chat {
            id: Some(3),
            text: "hi".to_string(),
            sender: "alice".to_string(),
            time: 1700000000,
        };
        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["sender"], "alice");
        assert_eq!(value["text"], "hi");
        assert_eq!(value["time"], 1700000000);
        assert_eq!(value["id"], 3);
    }

    #[test]
    fn test_inbound_envelope_omits_id() {
        let bytes = Envelope::chat("alice", "hi").to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let result = Envelope::from_bytes(br#"{"type":"shutdown","text":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::from_bytes(b"not json at all").is_err());
    }
}
