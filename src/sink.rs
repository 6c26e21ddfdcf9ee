//! Delivery of domain events to the host.

use crate::core::event::AccessEvent;
use crossbeam_channel::{Receiver, Sender};

/// Receiver of emitted events.
///
/// `emit` is synchronous; the poller marks an entry seen only after `emit`
/// returned `Ok`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AccessEvent) -> Result<(), SinkError>;
}

/// The consumer side of a sink went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError(pub String);

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event sink error: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

/// Sink that forwards events over a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<AccessEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<AccessEvent>) -> Self {
        Self { sender }
    }

    /// Create an unbounded sink and the receiver draining it.
    pub fn unbounded() -> (Self, Receiver<AccessEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &AccessEvent) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map_err(|_| SinkError("event receiver disconnected".to_string()))
    }
}
