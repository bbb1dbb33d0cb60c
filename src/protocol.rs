//! Signaling wire protocol: typed JSON control messages.
//!
//! Every message on the control connection is a single JSON text frame:
//!
//!   {"type":"REGISTER","id":"dev-42","payload":{...},"metadata":{"k":"v"}}
//!
//! `type` and `id` are hard requirements — decode never infers defaults for
//! either. `payload` is an arbitrary JSON tree owned by the message;
//! `metadata` is a flat string-to-string map, omitted from the wire when
//! empty. Unknown `type` strings are a decode failure, not silently accepted.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Message type ────────────────────────────────────────────

/// The fixed enumeration of control message types.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Register,
    Request,
    Response,
    Offer,
    Answer,
    Ice,
    Heartbeat,
    Error,
    Disconnect,
    Status,
    ConfigUpdate,
    StreamInfo,
    Log,
    Diagnostics,
}

impl MessageType {
    /// Wire string form, for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Register => "REGISTER",
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Offer => "OFFER",
            MessageType::Answer => "ANSWER",
            MessageType::Ice => "ICE",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Error => "ERROR",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::Status => "STATUS",
            MessageType::ConfigUpdate => "CONFIG_UPDATE",
            MessageType::StreamInfo => "STREAM_INFO",
            MessageType::Log => "LOG",
            MessageType::Diagnostics => "DIAGNOSTICS",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Protocol error ──────────────────────────────────────────

/// Codec failures. Decoding errors are swallowed (logged) at the dispatch
/// boundary; encoding errors surface to whoever tried to send.
#[derive(Debug)]
pub enum ProtocolError {
    /// Message could not be serialized to JSON.
    Encoding(String),
    /// Frame is not a valid message (bad JSON, missing/invalid type or id).
    Decoding(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Encoding(detail) => write!(f, "encoding failed: {detail}"),
            ProtocolError::Decoding(detail) => write!(f, "decoding failed: {detail}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ── Message ─────────────────────────────────────────────────

/// A typed, identified control message exchanged with the signaling server.
///
/// Value semantics: `clone()` deep-copies the payload tree;
/// `take_payload()` transfers ownership and leaves the source empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub msg_type: MessageType,
    pub id: String,
    pub payload: Option<Value>,
    pub metadata: BTreeMap<String, String>,
}

impl SignalingMessage {
    pub fn new(msg_type: MessageType, id: impl Into<String>) -> Self {
        Self {
            msg_type,
            id: id.into(),
            payload: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Move the payload out, leaving the message payload-less.
    pub fn take_payload(&mut self) -> Option<Value> {
        self.payload.take()
    }

    /// Semantic validation. Returns a bool rather than erroring — callers
    /// must check before trusting type-specific payload fields.
    ///
    /// `id` must be non-empty for every type. Per-type payload rules:
    /// REGISTER/REQUEST/ERROR require a payload; OFFER/ANSWER require a
    /// string `sdp` field; ICE requires a string `candidate` field;
    /// HEARTBEAT and all remaining types accept an absent payload.
    pub fn validate(&self) -> bool {
        if self.id.is_empty() {
            return false;
        }
        match self.msg_type {
            MessageType::Register | MessageType::Request | MessageType::Error => {
                self.payload.is_some()
            }
            MessageType::Offer | MessageType::Answer => self.payload_str_field("sdp"),
            MessageType::Ice => self.payload_str_field("candidate"),
            _ => true,
        }
    }

    fn payload_str_field(&self, field: &str) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get(field))
            .and_then(Value::as_str)
            .is_some()
    }
}

// ── Wire codec ──────────────────────────────────────────────

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "type")]
    msg_type: MessageType,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type")]
    msg_type: MessageType,
    id: String,
    // A present `"payload":null` must stay distinct from an absent field;
    // the default covers absent, the deserializer keeps null as a value.
    #[serde(default, deserialize_with = "present_payload")]
    payload: Option<Value>,
    // Raw Value: a non-object metadata field is ignored, and non-string
    // entries inside an object are dropped rather than failing the frame.
    #[serde(default)]
    metadata: Option<Value>,
}

fn present_payload<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Encode a message to its JSON text frame. Empty metadata is omitted.
pub fn encode(message: &SignalingMessage) -> Result<String, ProtocolError> {
    let wire = WireOut {
        msg_type: message.msg_type,
        id: &message.id,
        payload: message.payload.as_ref(),
        metadata: if message.metadata.is_empty() {
            None
        } else {
            Some(&message.metadata)
        },
    };
    serde_json::to_string(&wire).map_err(|e| ProtocolError::Encoding(e.to_string()))
}

/// Decode a JSON text frame into a message.
///
/// Fails on invalid JSON, a missing/non-string/unrecognized `type`, or a
/// missing/non-string `id`. Payload and metadata are optional.
pub fn decode(raw: &[u8]) -> Result<SignalingMessage, ProtocolError> {
    let wire: WireIn =
        serde_json::from_slice(raw).map_err(|e| ProtocolError::Decoding(e.to_string()))?;

    let mut metadata = BTreeMap::new();
    if let Some(map) = wire.metadata.as_ref().and_then(Value::as_object) {
        for (key, value) in map {
            if let Some(s) = value.as_str() {
                metadata.insert(key.clone(), s.to_string());
            }
        }
    }

    Ok(SignalingMessage {
        msg_type: wire.msg_type,
        id: wire.id,
        payload: wire.payload,
        metadata,
    })
}

// ── Tests ───────────────────────────────────────────────────
