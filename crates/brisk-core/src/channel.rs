//! The channel (websocket) handler contract.
//!
//! A channel handler is invoked once per inbound message and writes
//! outbound messages through a [`ChannelWriter`]. Returning
//! [`ChannelFlow::Stop`] ends the session; the connection flushes any
//! queued messages first and then closes the transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// A websocket payload, already de-framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl ChannelMessage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ChannelMessage::Text(text) => text.as_bytes(),
            ChannelMessage::Binary(bytes) => bytes,
        }
    }
}

/// What the connection should do after a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFlow {
    Continue,
    Stop,
}

/// Queue of outbound messages, flushed by the connection after each
/// handler invocation. Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct ChannelWriter {
    queue: Arc<Mutex<VecDeque<ChannelMessage>>>,
}

impl ChannelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, message: ChannelMessage) {
        self.lock().push_back(message);
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(ChannelMessage::Text(text.into()));
    }

    /// Take everything queued so far, in send order.
    pub fn drain(&self) -> Vec<ChannelMessage> {
        self.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ChannelMessage>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_send_order() {
        let writer = ChannelWriter::new();
        writer.send_text("one");
        writer.send(ChannelMessage::Binary(vec![2]));
        let drained = writer.drain();
        assert_eq!(drained[0], ChannelMessage::Text("one".into()));
        assert_eq!(drained[1], ChannelMessage::Binary(vec![2]));
        assert!(writer.is_empty());
    }

    #[test]
    fn clones_share_the_queue() {
        let writer = ChannelWriter::new();
        let clone = writer.clone();
        clone.send_text("shared");
        assert_eq!(writer.drain().len(), 1);
    }
}
