//! Measurement records and the sinks consuming them.
//!
//! The acquisition session hands every decoded [`MeasureRecord`] to a
//! [`RecordSink`] in reception order. Recoverable stream errors (missing
//! sample, garbled frame) are reported to the same sink, which decides whether
//! acquisition goes on.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{AppResult, DaqError};

pub mod record;

pub use record::{ChannelRecord, MeasureRecord};

/// What the session should do after a recoverable stream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Keep reading frames
    Continue,
    /// End the session in the `Aborted` state
    Abort,
}

/// Consumer of acquisition output.
#[async_trait]
pub trait RecordSink: Send {
    /// Receive one record. An error here aborts the session.
    async fn emit(&mut self, record: MeasureRecord) -> AppResult<()>;

    /// Receive a recoverable stream error. The session has already logged it.
    async fn on_stream_error(&mut self, _error: &DaqError) -> StreamControl {
        StreamControl::Continue
    }

    /// Called once when streaming ends, whatever the reason.
    async fn finish(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Tagged item delivered by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoded sample
    Record(MeasureRecord),
    /// No frame arrived within the read timeout
    NoSample(Duration),
    /// A frame was discarded
    Malformed(String),
}

/// Sink forwarding records and errors to an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
    abort_on_error: bool,
}

impl ChannelSink {
    /// Create a sink and its receiving end.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                abort_on_error: false,
            },
            rx,
        )
    }

    /// Ask the session to abort on the first stream error.
    pub fn abort_on_error(mut self) -> Self {
        self.abort_on_error = true;
        self
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn emit(&mut self, record: MeasureRecord) -> AppResult<()> {
        self.tx
            .send(StreamEvent::Record(record))
            .await
            .map_err(|_| DaqError::Storage("record receiver dropped".to_string()))
    }

    async fn on_stream_error(&mut self, error: &DaqError) -> StreamControl {
        let event = match error {
            DaqError::Timeout(timeout) => StreamEvent::NoSample(*timeout),
            other => StreamEvent::Malformed(other.to_string()),
        };
        if self.tx.send(event).await.is_err() || self.abort_on_error {
            StreamControl::Abort
        } else {
            StreamControl::Continue
        }
    }
}
