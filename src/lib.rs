//! Kinnode device daemon library — control-plane signaling client.
//!
//! Exposes the protocol codec, dispatcher, connection manager, and session
//! orchestration so integration tests can exercise the full client path
//! against a loopback server.

pub mod connection;
pub mod device_config;
pub mod dispatch;
pub mod metrics;
pub mod protocol;
pub mod session;

/// Protocol version announced in REGISTER metadata.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// WebSocket subprotocol spoken on the control connection.
pub const SIGNALING_SUBPROTOCOL: &str = "signaling";
