//! Device session orchestration.
//!
//! Composes the connection, dispatcher, and codec into the device's
//! control-plane behavior: register on startup, heartbeat on a timer,
//! answer stream-availability requests, and forward WebRTC offers to the
//! media layer.
//!
//! Session states: Uninitialized → Registering → Active → ShuttingDown.
//!
//! Two threads touch this state: the caller thread runs `initialize` and
//! `run_loop`; the inbound handler runs on the event loop worker and only
//! touches the connection, the identity config, and the media hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::connection::ConnectionManager;
use crate::device_config::DeviceConfig;
use crate::dispatch::Dispatcher;
use crate::metrics::MetricsSource;
use crate::protocol::{MessageType, SignalingMessage};
use crate::PROTOCOL_VERSION;

// ── Constants ───────────────────────────────────────────────

/// Interval between heartbeat messages.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long `initialize` waits for the worker to confirm establishment.
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// The heartbeat sleep is sliced so the shutdown flag is observed promptly
/// instead of once per heartbeat interval.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

// ── Media hook ──────────────────────────────────────────────

/// Media-negotiation collaborator. The session only routes: answer/ICE
/// generation happens behind this seam.
pub trait MediaHook: Send {
    fn on_offer(&mut self, offer: &SignalingMessage);
}

/// Stub hook that logs offers and does nothing else.
pub struct LogOnlyMedia;

impl MediaHook for LogOnlyMedia {
    fn on_offer(&mut self, offer: &SignalingMessage) {
        eprintln!(
            "[session] received media offer from '{}' (not negotiating)",
            offer.id
        );
    }
}

// ── Session state ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Registering,
    Active,
    ShuttingDown,
}

// ── Device session ──────────────────────────────────────────

/// High-level session over the signaling connection. Owns the connection
/// for the life of the process; messages are constructed per event and not
/// persisted.
pub struct DeviceSession {
    config: DeviceConfig,
    conn: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
    metrics: Box<dyn MetricsSource>,
    media: Arc<Mutex<Box<dyn MediaHook>>>,
    shutdown: Arc<AtomicBool>,
    heartbeat_interval: Duration,
    state: SessionState,
}

impl DeviceSession {
    pub fn new(
        config: DeviceConfig,
        conn: Arc<ConnectionManager>,
        dispatcher: Arc<Dispatcher>,
        metrics: Box<dyn MetricsSource>,
        media: Box<dyn MediaHook>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            conn,
            dispatcher,
            metrics,
            media: Arc::new(Mutex::new(media)),
            shutdown,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            state: SessionState::Uninitialized,
        }
    }

    /// Override the heartbeat interval (tests use sub-second intervals).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connect, start the event loop, and register the device.
    ///
    /// Returns false on any failure, leaving the session Uninitialized
    /// (with the connection torn back down). On success the session is
    /// Active and inbound messages flow to the handler.
    pub fn initialize(&mut self) -> bool {
        // Handler first, so nothing lands in the fallback queue once frames
        // start arriving.
        self.install_handler();

        if !self.conn.connect() {
            eprintln!("[session] failed to connect to signaling server");
            return false;
        }
        self.conn.start_event_loop();

        if !self.conn.wait_connected(ESTABLISH_TIMEOUT) {
            eprintln!("[session] connection was not established in time");
            self.conn.disconnect();
            return false;
        }

        self.state = SessionState::Registering;
        let registration = self.registration_message();
        if let Err(e) = self.conn.send(&registration) {
            eprintln!("[session] registration failed: {e}");
            self.conn.disconnect();
            self.state = SessionState::Uninitialized;
            return false;
        }

        eprintln!("[session] registered as '{}'", self.config.device_id);
        self.state = SessionState::Active;
        true
    }

    /// Heartbeat until the shutdown flag is observed, then disconnect.
    /// Returns immediately unless the session is Active.
    ///
    /// A failed heartbeat is logged and the loop continues — send failures
    /// are the caller's to judge, and this caller keeps going.
    pub fn run_loop(&mut self) {
        if self.state != SessionState::Active {
            eprintln!("[session] run_loop called while not active, ignoring");
            return;
        }
        while !self.shutdown.load(Ordering::SeqCst) {
            let heartbeat = self.heartbeat_message();
            if let Err(e) = self.conn.send(&heartbeat) {
                eprintln!("[session] heartbeat failed: {e}");
            }

            let mut slept = Duration::ZERO;
            while slept < self.heartbeat_interval && !self.shutdown.load(Ordering::SeqCst) {
                let step = SHUTDOWN_POLL.min(self.heartbeat_interval - slept);
                thread::sleep(step);
                slept += step;
            }
        }

        self.conn.disconnect();
        self.state = SessionState::ShuttingDown;
        eprintln!("[session] shut down");
    }

    fn install_handler(&self) {
        let conn = Arc::clone(&self.conn);
        let config = self.config.clone();
        let media = Arc::clone(&self.media);
        self.dispatcher
            .set_handler(move |msg| handle_inbound(&conn, &config, &media, msg));
    }

    /// REGISTER carrying the device identity, tagged with the protocol
    /// version.
    fn registration_message(&self) -> SignalingMessage {
        SignalingMessage::new(MessageType::Register, self.config.device_id.clone())
            .with_payload(json!({
                "device_type": "camera",
                "mac_address": self.config.mac_address,
                "csn": self.config.cloud_serial_number,
            }))
            .with_metadata("version", PROTOCOL_VERSION)
            .with_metadata("stream_count", "1")
    }

    /// HEARTBEAT carrying current uptime/temperature.
    fn heartbeat_message(&self) -> SignalingMessage {
        SignalingMessage::new(MessageType::Heartbeat, self.config.device_id.clone()).with_payload(
            json!({
                "uptime": self.metrics.uptime_secs(),
                "temperature": self.metrics.temperature_celsius(),
            }),
        )
    }
}

/// Inbound dispatch: runs on the event loop worker thread.
///
/// REQUEST → stream-availability RESPONSE correlated via
/// `metadata["request_id"]`; OFFER → media hook; everything else is logged
/// and ignored.
fn handle_inbound(
    conn: &ConnectionManager,
    config: &DeviceConfig,
    media: &Mutex<Box<dyn MediaHook>>,
    msg: SignalingMessage,
) {
    match msg.msg_type {
        MessageType::Request => {
            let response = stream_response(config, &msg.id);
            if let Err(e) = conn.send(&response) {
                eprintln!("[session] failed to answer stream request '{}': {e}", msg.id);
            }
        }
        MessageType::Offer => {
            media
                .lock()
                .expect("media hook lock poisoned")
                .on_offer(&msg);
        }
        other => {
            eprintln!("[session] ignoring {other} message from '{}'", msg.id);
        }
    }
}

/// Build the RESPONSE to a stream-availability REQUEST.
fn stream_response(config: &DeviceConfig, request_id: &str) -> SignalingMessage {
    SignalingMessage::new(MessageType::Response, config.device_id.clone())
        .with_metadata("request_id", request_id)
        .with_payload(json!({
            "status": "available",
            "stream_url": config.stream_url,
            "rtp_port": config.default_rtp_port,
        }))
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            device_id: "cam-test".to_string(),
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            cloud_serial_number: "CSN-42".to_string(),
            stream_url: "rtsp://10.0.0.5:8554/main".to_string(),
            default_rtp_port: 5004,
        }
    }

    struct FixedMetrics;

    impl MetricsSource for FixedMetrics {
        fn uptime_secs(&self) -> f64 {
            120.0
        }
        fn temperature_celsius(&self) -> f64 {
            40.5
        }
    }

    fn offline_session() -> DeviceSession {
        let dispatcher = Arc::new(Dispatcher::new());
        let conn = Arc::new(
            ConnectionManager::new("ws://127.0.0.1:9/", "signaling", Arc::clone(&dispatcher))
                .unwrap(),
        );
        DeviceSession::new(
            test_config(),
            conn,
            dispatcher,
            Box::new(FixedMetrics),
            Box::new(LogOnlyMedia),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn registration_message_is_valid() {
        let session = offline_session();
        let msg = session.registration_message();
        assert_eq!(msg.msg_type, MessageType::Register);
        assert_eq!(msg.id, "cam-test");
        assert!(msg.validate());
        assert_eq!(msg.metadata_value("version"), Some(PROTOCOL_VERSION));
        assert_eq!(msg.metadata_value("stream_count"), Some("1"));
        let payload = msg.payload.unwrap();
        assert_eq!(payload["device_type"], "camera");
        assert_eq!(payload["mac_address"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(payload["csn"], "CSN-42");
    }

    #[test]
    fn heartbeat_message_carries_metrics() {
        let session = offline_session();
        let msg = session.heartbeat_message();
        assert_eq!(msg.msg_type, MessageType::Heartbeat);
        assert!(msg.validate());
        let payload = msg.payload.unwrap();
        assert_eq!(payload["uptime"], 120.0);
        assert_eq!(payload["temperature"], 40.5);
    }

    #[test]
    fn stream_response_correlates_request_id() {
        let config = test_config();
        let response = stream_response(&config, "req-77");
        assert_eq!(response.msg_type, MessageType::Response);
        assert_eq!(response.id, "cam-test");
        assert_eq!(response.metadata_value("request_id"), Some("req-77"));
        let payload = response.payload.unwrap();
        assert_eq!(payload["status"], "available");
        assert_eq!(payload["stream_url"], "rtsp://10.0.0.5:8554/main");
        assert_eq!(payload["rtp_port"], 5004);
    }

    #[test]
    fn offers_are_routed_to_media_hook() {
        struct RecordingMedia(mpsc::Sender<String>);
        impl MediaHook for RecordingMedia {
            fn on_offer(&mut self, offer: &SignalingMessage) {
                self.0.send(offer.id.clone()).unwrap();
            }
        }

        let dispatcher = Arc::new(Dispatcher::new());
        let conn =
            ConnectionManager::new("ws://127.0.0.1:9/", "signaling", Arc::clone(&dispatcher))
                .unwrap();
        let (tx, rx) = mpsc::channel();
        let media: Mutex<Box<dyn MediaHook>> = Mutex::new(Box::new(RecordingMedia(tx)));

        let offer = SignalingMessage::new(MessageType::Offer, "peer-3")
            .with_payload(json!({"sdp": "v=0"}));
        handle_inbound(&conn, &test_config(), &media, offer);
        assert_eq!(rx.recv().unwrap(), "peer-3");

        // Non-REQUEST/OFFER types are logged and ignored, not routed.
        let status = SignalingMessage::new(MessageType::Status, "srv");
        handle_inbound(&conn, &test_config(), &media, status);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn initialize_fails_cleanly_when_server_unreachable() {
        let mut session = offline_session();
        assert!(!session.initialize());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn run_loop_exits_on_shutdown_flag() {
        let dispatcher = Arc::new(Dispatcher::new());
        let conn = Arc::new(
            ConnectionManager::new("ws://127.0.0.1:9/", "signaling", Arc::clone(&dispatcher))
                .unwrap(),
        );
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut session = DeviceSession::new(
            test_config(),
            conn,
            dispatcher,
            Box::new(FixedMetrics),
            Box::new(LogOnlyMedia),
            Arc::clone(&shutdown),
        )
        .with_heartbeat_interval(Duration::from_millis(50));
        session.state = SessionState::Active;

        // Flag already set: the loop must exit without hanging.
        session.run_loop();
        assert_eq!(session.state(), SessionState::ShuttingDown);
    }

    #[test]
    fn run_loop_is_a_noop_unless_active() {
        let mut session = offline_session();
        assert_eq!(session.state(), SessionState::Uninitialized);

        // Never initialized: no heartbeats, no state change, returns at once.
        session.run_loop();
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}
