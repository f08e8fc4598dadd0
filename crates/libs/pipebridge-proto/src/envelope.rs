//! The JSON message envelope exchanged between a relay and its peer process.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ProtoError;

/// Payload field carrying the session id that scopes which peer's messages
/// a relay accepts. Stamped into every outbound `data` mapping.
pub const SESSION_ID_FIELD: &str = "remote_session_id";

/// One message on the wire.
///
/// `id` is unique per message and generated by the sender; a reply carries
/// the id of the message it answers in `in_reply_to_event`. The field is
/// omitted entirely (not serialized as `null`) for unsolicited messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_event: Option<String>,
}

impl Envelope {
    /// Create an unsolicited message with a fresh random id.
    pub fn new(
        topic: impl Into<String>,
        data: Map<String, Value>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            data,
            source: source.into(),
            in_reply_to_event: None,
        }
    }

    /// Create a reply to this envelope: same topic, fresh id,
    /// `in_reply_to_event` set to this envelope's id.
    pub fn reply_to(&self, data: Map<String, Value>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: self.topic.clone(),
            data,
            source: source.into(),
            in_reply_to_event: Some(self.id.clone()),
        }
    }

    /// Session id carried in the payload, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.data.get(SESSION_ID_FIELD).and_then(Value::as_str)
    }

    /// Serialize to UTF-8 JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, ProtoError> {
        serde_json::to_vec(self).map_err(|err| ProtoError::Encode(err.to_string()))
    }

    /// Deserialize from UTF-8 JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtoError> {
        serde_json::from_slice(bytes).map_err(|err| ProtoError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(SESSION_ID_FIELD.to_string(), json!("sess-1"));
        data.insert("version".to_string(), json!(24));
        data
    }

    #[test]
    fn json_roundtrip_preserves_envelope() {
        let event = Envelope::new("pipebridge.remote.context.data", payload(), "harmony");
        let bytes = event.to_json().expect("encode envelope");
        let decoded = Envelope::from_json(&bytes).expect("decode envelope");
        assert_eq!(decoded, event);
    }

    #[test]
    fn unsolicited_envelope_omits_reply_field() {
        let event = Envelope::new("pipebridge.remote.ping", payload(), "harmony");
        let text = String::from_utf8(event.to_json().expect("encode envelope")).expect("utf-8");
        assert!(!text.contains("in_reply_to_event"));
    }

    #[test]
    fn reply_correlates_to_original_id() {
        let request = Envelope::new("pipebridge.remote.rpc", payload(), "standalone");
        let reply = request.reply_to(Map::new(), "harmony");
        assert_eq!(reply.in_reply_to_event.as_deref(), Some(request.id.as_str()));
        assert_eq!(reply.topic, request.topic);
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn session_id_reads_payload_field() {
        let event = Envelope::new("pipebridge.remote.ping", payload(), "harmony");
        assert_eq!(event.session_id(), Some("sess-1"));

        let bare = Envelope::new("pipebridge.remote.ping", Map::new(), "harmony");
        assert_eq!(bare.session_id(), None);
    }

    #[test]
    fn missing_data_and_source_decode_as_empty() {
        let decoded = Envelope::from_json(br#"{"id": "abc", "topic": "t"}"#).expect("decode");
        assert!(decoded.data.is_empty());
        assert!(decoded.source.is_empty());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = Envelope::from_json(b"{not json").expect_err("must fail");
        assert!(matches!(err, ProtoError::Decode(_)));
    }
}
