//! Progress sinks.
//!
//! The orchestrator reports every step transition through a [`ProgressSink`].
//! Sinks may fail (a client hung up on a streamed response), and callers are
//! expected to log and drop those errors rather than abort the work.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::EventEnvelope;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Progress stream closed")]
    Closed,

    #[error("Progress sink failed: {0}")]
    Other(String),
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, envelope: &EventEnvelope) -> Result<(), SinkError>;
}

/// Forwards events into an mpsc channel, e.g. feeding a streamed response.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<EventEnvelope>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        self.sender
            .send(envelope.clone())
            .map_err(|_| SinkError::Closed)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _envelope: &EventEnvelope) -> Result<(), SinkError> {
        Ok(())
    }
}
