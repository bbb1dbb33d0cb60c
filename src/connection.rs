//! Persistent signaling connection: ownership, supervision, send path.
//!
//! Exactly one outbound WebSocket to one server is modeled. The
//! `ConnectionManager` owns the stream and the `EventLoop` worker that
//! services it; the worker reads with a bounded socket timeout (the poll
//! quantum), releases the stream lock, and hands complete frames to the
//! `Dispatcher`.
//!
//! No retry, no backoff, no reconnection: a dropped connection is terminal
//! until the caller invokes `connect()` again.
//!
//! `is_connected()` is eventually consistent — the flag is updated on the
//! worker thread, so it may lag the transport by up to one poll quantum
//! plus the yield interval.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::dispatch::Dispatcher;
use crate::protocol::{self, ProtocolError, SignalingMessage};

type WsStream = WebSocket<MaybeTlsStream<std::net::TcpStream>>;

// ── Constants ───────────────────────────────────────────────

/// Bounded wait for each service pass over the transport.
pub const DEFAULT_POLL_QUANTUM: Duration = Duration::from_millis(50);

/// Pause between service passes.
pub const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_millis(10);

/// Poll step while waiting for the worker to confirm establishment.
const ESTABLISH_POLL: Duration = Duration::from_millis(10);

// ── Connection state ────────────────────────────────────────

/// Transport-reported connection state.
///
/// Disconnected → Connecting → Connected → Disconnected. There is no
/// Reconnecting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────

/// Fatal construction-time failure: the transport cannot even be described.
#[derive(Debug)]
pub enum ConnectionSetupError {
    /// Server URL does not parse as a WebSocket client request.
    InvalidUrl { url: String, detail: String },
    /// Subprotocol string is not a legal header value.
    InvalidSubprotocol { subprotocol: String },
}

impl fmt::Display for ConnectionSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url, detail } => {
                write!(f, "invalid signaling server URL '{url}': {detail}")
            }
            Self::InvalidSubprotocol { subprotocol } => {
                write!(f, "invalid subprotocol '{subprotocol}'")
            }
        }
    }
}

impl std::error::Error for ConnectionSetupError {}

/// Recoverable send-path failure, surfaced to whichever caller invoked
/// `send`. The caller decides whether to resend.
#[derive(Debug)]
pub enum SendError {
    /// No established connection.
    NotConnected,
    /// The transport accepted fewer bytes than submitted. The whole frame
    /// is considered failed; there is no partial-write retry.
    Incomplete { requested: usize },
    /// The message could not be serialized.
    Encoding(ProtocolError),
    /// Other transport failure.
    Transport(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to signaling server"),
            Self::Incomplete { requested } => {
                write!(f, "transport accepted fewer than {requested} bytes — frame not sent")
            }
            Self::Encoding(e) => write!(f, "cannot encode outbound message: {e}"),
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
        }
    }
}

impl std::error::Error for SendError {}

// ── Shared connection state ─────────────────────────────────

struct Shared {
    stream: Mutex<Option<WsStream>>,
    state: AtomicU8,
    dispatcher: Arc<Dispatcher>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

// ── Event loop ──────────────────────────────────────────────

/// Background worker that pumps the connection's I/O.
///
/// One service pass = one bounded read (at most the poll quantum) while
/// holding the stream lock, then the lock is released and any complete
/// frame is forwarded to the Dispatcher — so a handler that calls `send`
/// never deadlocks against the worker.
struct EventLoop {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    poll_quantum: Duration,
    yield_interval: Duration,
}

impl EventLoop {
    fn new(poll_quantum: Duration, yield_interval: Duration) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            // A zero quantum would turn the socket timeout into "block forever".
            poll_quantum: poll_quantum.max(Duration::from_millis(1)),
            yield_interval,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stopped → Running. No-op while already Running.
    fn start(&mut self, shared: Arc<Shared>) {
        if self.is_running() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let quantum = self.poll_quantum;
        let pause = self.yield_interval;
        self.handle = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if let Some(frame) = service_once(&shared, quantum) {
                    shared.dispatcher.on_inbound(&frame);
                }
                thread::sleep(pause);
            }
        }));
    }

    /// Signal the worker and join it. After this returns, no further
    /// dispatch callback runs. No-op while Stopped.
    ///
    /// Cancellation is cooperative: the flag is observed between service
    /// passes, so latency is bounded by poll quantum + yield interval.
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One bounded service pass. Returns a complete inbound frame, if any.
///
/// All state transitions observed from the transport (establishment, close,
/// fatal errors) happen here, on the worker thread.
fn service_once(shared: &Shared, quantum: Duration) -> Option<Vec<u8>> {
    let mut guard = shared.stream.lock().expect("connection lock poisoned");
    let ws = guard.as_mut()?;

    // The handshake completed in connect(); the worker confirms it on its
    // first pass over the live stream.
    if shared.state() == ConnectionState::Connecting {
        shared.set_state(ConnectionState::Connected);
        eprintln!("[conn] connection established");
    }

    if let Err(e) = set_read_timeout(ws, quantum) {
        // Cannot bound the read — fail closed rather than block forever.
        eprintln!("[conn] cannot bound transport read: {e}");
        *guard = None;
        shared.set_state(ConnectionState::Disconnected);
        return None;
    }

    match ws.read() {
        Ok(msg) if msg.is_ping() || msg.is_pong() => None,
        Ok(Message::Text(text)) => Some(text.into_bytes()),
        Ok(Message::Binary(bytes)) => Some(bytes),
        Ok(Message::Close(_)) => {
            eprintln!("[conn] server closed the connection");
            *guard = None;
            shared.set_state(ConnectionState::Disconnected);
            None
        }
        Ok(_) => None,
        Err(tungstenite::Error::Io(ref e))
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
        {
            // Quantum expired with nothing to read.
            None
        }
        Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
            *guard = None;
            shared.set_state(ConnectionState::Disconnected);
            None
        }
        Err(e) => {
            eprintln!("[conn] transport error: {e}");
            *guard = None;
            shared.set_state(ConnectionState::Disconnected);
            None
        }
    }
}

/// Bound the next read on the underlying TCP stream.
fn set_read_timeout(ws: &WsStream, timeout: Duration) -> io::Result<()> {
    match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(Some(timeout)),
        // Fail-closed: no TLS backend is compiled in. If one is added, this
        // arm forces an explicit timeout implementation instead of silently
        // blocking forever on ws.read().
        #[allow(unreachable_patterns)]
        _ => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "read timeout not supported for this stream type",
        )),
    }
}

// ── Connection manager ──────────────────────────────────────

/// Owns the single outbound connection to the signaling server.
pub struct ConnectionManager {
    url: String,
    subprotocol: String,
    shared: Arc<Shared>,
    event_loop: Mutex<EventLoop>,
}

impl ConnectionManager {
    /// Describe the transport. The URL and subprotocol are validated here;
    /// a bad value is a fatal setup error and aborts startup.
    pub fn new(
        url: impl Into<String>,
        subprotocol: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, ConnectionSetupError> {
        let url = url.into();
        let subprotocol = subprotocol.into();

        if let Err(e) = url.as_str().into_client_request() {
            return Err(ConnectionSetupError::InvalidUrl {
                url,
                detail: e.to_string(),
            });
        }
        if HeaderValue::from_str(&subprotocol).is_err() {
            return Err(ConnectionSetupError::InvalidSubprotocol { subprotocol });
        }

        Ok(Self {
            url,
            subprotocol,
            shared: Arc::new(Shared {
                stream: Mutex::new(None),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                dispatcher,
            }),
            event_loop: Mutex::new(EventLoop::new(DEFAULT_POLL_QUANTUM, DEFAULT_YIELD_INTERVAL)),
        })
    }

    /// Override the worker's poll quantum and yield interval. Call before
    /// starting the event loop; once a worker is live the override is
    /// ignored, so the running loop (and its join handle) stays intact.
    pub fn with_timing(self, poll_quantum: Duration, yield_interval: Duration) -> Self {
        {
            let mut event_loop = self.event_loop.lock().expect("event loop lock poisoned");
            if event_loop.is_running() {
                eprintln!("[conn] ignoring timing override while the event loop is running");
            } else {
                *event_loop = EventLoop::new(poll_quantum, yield_interval);
            }
        }
        self
    }

    /// Establish the connection. Idempotent: returns true immediately when
    /// a connection attempt is already live. Returns false on transport
    /// failure — never panics or errors.
    ///
    /// On success the state is Connecting; the worker flips it to Connected
    /// on its next service pass.
    pub fn connect(&self) -> bool {
        if self.state() != ConnectionState::Disconnected {
            return true;
        }

        let mut request = match self.url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                eprintln!("[conn] invalid server URL '{}': {e}", self.url);
                return false;
            }
        };
        match HeaderValue::from_str(&self.subprotocol) {
            Ok(value) => {
                request.headers_mut().insert("Sec-WebSocket-Protocol", value);
            }
            Err(e) => {
                eprintln!("[conn] invalid subprotocol '{}': {e}", self.subprotocol);
                return false;
            }
        }

        match tungstenite::connect(request) {
            Ok((ws, _response)) => {
                *self.shared.stream.lock().expect("connection lock poisoned") = Some(ws);
                self.shared.set_state(ConnectionState::Connecting);
                eprintln!(
                    "[conn] connecting to {} (subprotocol '{}')",
                    self.url, self.subprotocol
                );
                true
            }
            Err(e) => {
                eprintln!("[conn] connect to {} failed: {e}", self.url);
                false
            }
        }
    }

    /// Encode and write one text frame.
    pub fn send(&self, message: &SignalingMessage) -> Result<(), SendError> {
        if self.state() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        let text = protocol::encode(message).map_err(SendError::Encoding)?;
        let requested = text.len();

        let mut guard = self.shared.stream.lock().expect("connection lock poisoned");
        let ws = guard.as_mut().ok_or(SendError::NotConnected)?;

        match ws.send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::WriteBufferFull(_)) => Err(SendError::Incomplete { requested }),
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WriteZero => {
                Err(SendError::Incomplete { requested })
            }
            Err(e) => Err(SendError::Transport(e.to_string())),
        }
    }

    /// Stop the worker, close the transport gracefully, and enter
    /// Disconnected. Blocks until the worker has terminated. No-op when
    /// already Disconnected; safe to call repeatedly.
    pub fn disconnect(&self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        self.stop_event_loop();

        let mut guard = self.shared.stream.lock().expect("connection lock poisoned");
        if let Some(mut ws) = guard.take() {
            let _ = ws.close(None);
            let _ = ws.flush();
        }
        self.shared.set_state(ConnectionState::Disconnected);
        eprintln!("[conn] disconnected");
    }

    /// Latest transport-reported state. May be stale by up to one poll
    /// quantum plus the yield interval.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the transport has reported establishment (same staleness
    /// bound as `state()`).
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Block until the worker confirms establishment, the connection drops,
    /// or the timeout expires. Returns true only on Connected.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                ConnectionState::Connected => return true,
                ConnectionState::Disconnected => return false,
                ConnectionState::Connecting => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(ESTABLISH_POLL);
        }
    }

    /// Start the event loop worker. No-op while already running.
    pub fn start_event_loop(&self) {
        self.event_loop
            .lock()
            .expect("event loop lock poisoned")
            .start(Arc::clone(&self.shared));
    }

    /// Stop and join the event loop worker. No-op while stopped.
    pub fn stop_event_loop(&self) {
        self.event_loop
            .lock()
            .expect("event loop lock poisoned")
            .stop();
    }

    /// Whether the worker is running.
    pub fn event_loop_running(&self) -> bool {
        self.event_loop
            .lock()
            .expect("event loop lock poisoned")
            .is_running()
    }
}

// ── Tests ───────────────────────────────────────────────────
