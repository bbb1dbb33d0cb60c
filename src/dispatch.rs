//! Inbound message dispatch: one live handler or a holding queue.
//!
//! Every decoded inbound frame goes to exactly one place. If a handler is
//! registered it is invoked synchronously on the event loop thread, holding
//! the dispatch lock for the duration of the call — handlers must not block
//! indefinitely or they stall further dispatch. With no handler registered,
//! messages accumulate in an unbounded FIFO queue for later retrieval.
//!
//! Undecodable frames are logged and dropped; a partial message is never
//! delivered.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::protocol::{self, SignalingMessage};

/// Inbound message callback. Runs on the event loop thread.
pub type MessageHandler = Box<dyn FnMut(SignalingMessage) + Send>;

struct DispatchInner {
    handler: Option<MessageHandler>,
    queue: VecDeque<SignalingMessage>,
}

/// Routes each inbound message to the registered handler, or queues it.
///
/// A single mutex guards both the handler slot and the queue, so handler
/// replacement, handler invocation, and queue pushes are never concurrent
/// with each other.
pub struct Dispatcher {
    inner: Mutex<DispatchInner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DispatchInner {
                handler: None,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Register (or replace) the inbound handler. Messages already queued
    /// are left untouched — registration does not drain the queue.
    pub fn set_handler(&self, handler: impl FnMut(SignalingMessage) + Send + 'static) {
        let mut inner = self.inner.lock().expect("dispatch lock poisoned");
        inner.handler = Some(Box::new(handler));
    }

    /// Decode a raw frame and deliver it.
    ///
    /// Decode failures are reported on the log side channel and the frame
    /// is dropped; they never propagate further.
    pub fn on_inbound(&self, raw: &[u8]) {
        let message = match protocol::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                eprintln!("[dispatch] dropping undecodable frame: {e}");
                return;
            }
        };

        let mut inner = self.inner.lock().expect("dispatch lock poisoned");
        match inner.handler.as_mut() {
            Some(handler) => handler(message),
            None => inner.queue.push_back(message),
        }
    }

    /// Pop the oldest queued message, if any. Strictly FIFO.
    pub fn pop_queued(&self) -> Option<SignalingMessage> {
        self.inner
            .lock()
            .expect("dispatch lock poisoned")
            .queue
            .pop_front()
    }

    /// Number of messages waiting in the fallback queue.
    pub fn queued_len(&self) -> usize {
        self.inner.lock().expect("dispatch lock poisoned").queue.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use std::sync::mpsc;

    fn frame(msg_type: &str, id: &str) -> Vec<u8> {
        format!(r#"{{"type":"{msg_type}","id":"{id}"}}"#).into_bytes()
    }

    #[test]
    fn queue_preserves_arrival_order() {
        let dispatcher = Dispatcher::new();
        dispatcher.on_inbound(&frame("STATUS", "a"));
        dispatcher.on_inbound(&frame("STATUS", "b"));
        dispatcher.on_inbound(&frame("STATUS", "c"));

        assert_eq!(dispatcher.queued_len(), 3);
        assert_eq!(dispatcher.pop_queued().unwrap().id, "a");
        assert_eq!(dispatcher.pop_queued().unwrap().id, "b");
        assert_eq!(dispatcher.pop_queued().unwrap().id, "c");
        assert!(dispatcher.pop_queued().is_none());
    }

    #[test]
    fn handler_takes_precedence_over_queue() {
        let dispatcher = Dispatcher::new();
        // Two messages arrive before any handler exists.
        dispatcher.on_inbound(&frame("STATUS", "early-1"));
        dispatcher.on_inbound(&frame("STATUS", "early-2"));

        let (tx, rx) = mpsc::channel();
        dispatcher.set_handler(move |msg| {
            tx.send(msg.id).unwrap();
        });

        // Registration must not drain or discard queued messages.
        assert_eq!(dispatcher.queued_len(), 2);

        dispatcher.on_inbound(&frame("REQUEST", "live"));
        assert_eq!(rx.recv().unwrap(), "live");
        // Queue undisturbed by handler delivery.
        assert_eq!(dispatcher.queued_len(), 2);
        assert_eq!(dispatcher.pop_queued().unwrap().id, "early-1");
        assert_eq!(dispatcher.pop_queued().unwrap().id, "early-2");
    }

    #[test]
    fn replacing_handler_routes_to_newest() {
        let dispatcher = Dispatcher::new();
        let (tx_old, rx_old) = mpsc::channel();
        let (tx_new, rx_new) = mpsc::channel();

        dispatcher.set_handler(move |msg| {
            tx_old.send(msg.id).unwrap();
        });
        dispatcher.set_handler(move |msg| {
            tx_new.send(msg.id).unwrap();
        });

        dispatcher.on_inbound(&frame("STATUS", "x"));
        assert_eq!(rx_new.recv().unwrap(), "x");
        assert!(rx_old.try_recv().is_err());
    }

    #[test]
    fn undecodable_frame_is_dropped() {
        let dispatcher = Dispatcher::new();
        dispatcher.on_inbound(b"{{{ not json");
        dispatcher.on_inbound(&frame("NOT_A_TYPE", "x"));
        dispatcher.on_inbound(br#"{"type":"STATUS"}"#);
        assert_eq!(dispatcher.queued_len(), 0);
    }

    #[test]
    fn decoded_message_reaches_handler_intact() {
        let dispatcher = Dispatcher::new();
        let (tx, rx) = mpsc::channel();
        dispatcher.set_handler(move |msg| {
            tx.send(msg).unwrap();
        });

        dispatcher
            .on_inbound(br#"{"type":"OFFER","id":"peer-9","payload":{"sdp":"v=0"},"metadata":{"via":"relay"}}"#);
        let msg = rx.recv().unwrap();
        assert_eq!(msg.msg_type, MessageType::Offer);
        assert_eq!(msg.id, "peer-9");
        assert!(msg.validate());
        assert_eq!(msg.metadata_value("via"), Some("relay"));
    }
}
