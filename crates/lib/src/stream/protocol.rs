//! Stream wire protocol: inbound envelopes, nested callback payloads, outbound ACKs.
//!
//! Inbound text frame: `{ "type": "SYSTEM"|"CALLBACK", "messageId"?, "headers"?: { "topic" }, "data"? }`.
//! For `CALLBACK`, `data` is a JSON document encoded as a string.
//! Outbound ACK: `{ "messageId", "code": "200", "message": "OK" }`.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

/// Sender id used when a callback payload has no `senderStaffId`.
pub const UNKNOWN_SENDER: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("malformed callback payload: {0}")]
    MalformedPayload(String),
    #[error("callback payload missing {0}")]
    MissingField(&'static str),
}

/// Envelope frame type discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    System,
    Callback,
    /// Any other `type` value; not routed, still acknowledged.
    Other(String),
    /// No `type` field.
    Missing,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub frame_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub headers: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Chat message carried by a `CALLBACK` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub conversation_id: String,
    pub conversation_type: String,
    pub sender_id: String,
    pub text: String,
    /// True iff the payload has an `atUsers` field.
    pub mentions_bot: bool,
}

impl ChatEvent {
    pub fn is_group(&self) -> bool {
        self.conversation_type == crate::api::client::GROUP_CONVERSATION_TYPE
    }
}

/// Accept strings as-is and numbers in decimal form; anything else is treated as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Decode one text frame. Fails only when the frame is not a JSON object.
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::MalformedEnvelope(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::MalformedEnvelope(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::MalformedEnvelope(e.to_string()))
}

/// ACK frame for a received `messageId`.
pub fn encode_ack(message_id: &str) -> String {
    json!({ "messageId": message_id, "code": "200", "message": "OK" }).to_string()
}

impl Envelope {
    pub fn kind(&self) -> FrameKind {
        match self.frame_type.as_deref() {
            Some("SYSTEM") => FrameKind::System,
            Some("CALLBACK") => FrameKind::Callback,
            Some(other) => FrameKind::Other(other.to_string()),
            None => FrameKind::Missing,
        }
    }

    /// `headers.topic`, if present.
    pub fn topic(&self) -> Option<&str> {
        self.headers.as_ref()?.get("topic")?.as_str()
    }

    /// Decode the nested `data` document into a [`ChatEvent`].
    pub fn chat_event(&self) -> Result<ChatEvent, DecodeError> {
        let data = self.data.as_ref().ok_or(DecodeError::MissingField("data"))?;
        decode_chat_event(data)
    }
}

/// Decode a callback `data` value: normally a JSON string, an inline object is accepted too.
pub fn decode_chat_event(data: &Value) -> Result<ChatEvent, DecodeError> {
    let parsed;
    let obj = match data {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
            as_object(&parsed)?
        }
        other => as_object(other)?,
    };

    let conversation_type = required_str(obj, "conversationType")?;
    let text = obj
        .get("text")
        .ok_or(DecodeError::MissingField("text"))?
        .get("content")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("text.content"))?;
    let conversation_id = required_str(obj, "conversationId")?;
    let sender_id = obj
        .get("senderStaffId")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_SENDER);

    Ok(ChatEvent {
        conversation_id: conversation_id.to_string(),
        conversation_type: conversation_type.to_string(),
        sender_id: sender_id.to_string(),
        text: text.to_string(),
        mentions_bot: obj.contains_key("atUsers"),
    })
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, DecodeError> {
    value
        .as_object()
        .ok_or_else(|| DecodeError::MalformedPayload("expected a JSON object".to_string()))
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, DecodeError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField(key))
}
