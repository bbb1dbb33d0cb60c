//! Wire schema vectors for the signaling protocol.
//!
//! Fixed JSON frames pin the wire format: field names, type strings, and
//! the hard requirements on `type` and `id`. A schema drift that survives
//! the in-module roundtrip tests gets caught here.

use kinnode_daemon::protocol::{self, MessageType, SignalingMessage};
use serde_json::json;

#[test]
fn register_roundtrip_end_to_end() {
    let msg = SignalingMessage::new(MessageType::Register, "dev-42")
        .with_payload(json!({"device_type": "camera"}));

    let text = protocol::encode(&msg).unwrap();
    let back = protocol::decode(text.as_bytes()).unwrap();

    assert_eq!(back.msg_type, MessageType::Register);
    assert_eq!(back.id, "dev-42");
    assert_eq!(back.payload, Some(json!({"device_type": "camera"})));
    assert!(back.validate());
}

#[test]
fn encoded_register_uses_wire_field_names() {
    let msg = SignalingMessage::new(MessageType::Register, "dev-42")
        .with_payload(json!({"device_type": "camera"}))
        .with_metadata("version", "1.0.0");
    let text = protocol::encode(&msg).unwrap();

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "REGISTER");
    assert_eq!(value["id"], "dev-42");
    assert_eq!(value["payload"]["device_type"], "camera");
    assert_eq!(value["metadata"]["version"], "1.0.0");
}

#[test]
fn ice_without_candidate_decodes_but_does_not_validate() {
    let msg = protocol::decode(br#"{"type":"ICE","id":"x"}"#).unwrap();
    assert_eq!(msg.msg_type, MessageType::Ice);
    assert_eq!(msg.id, "x");
    assert!(msg.payload.is_none());
    assert!(!msg.validate());
}

#[test]
fn decode_rejects_frames_missing_hard_requirements() {
    // Missing type.
    assert!(protocol::decode(br#"{"id":"dev-1","payload":{}}"#).is_err());
    // Missing id.
    assert!(protocol::decode(br#"{"type":"HEARTBEAT"}"#).is_err());
    // Unknown type string.
    assert!(protocol::decode(br#"{"type":"PING","id":"dev-1"}"#).is_err());
}

#[test]
fn offer_vector_from_server_validates() {
    let raw = br#"{
        "type": "OFFER",
        "id": "peer-7",
        "payload": {"sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n"},
        "metadata": {"session": "abc123"}
    }"#;
    let msg = protocol::decode(raw).unwrap();
    assert_eq!(msg.msg_type, MessageType::Offer);
    assert!(msg.validate());
    assert_eq!(msg.metadata_value("session"), Some("abc123"));
}
