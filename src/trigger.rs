//! Measurement request triggers.
//!
//! In manual mode (`integration_nb == 0`) the device sends a frame only after
//! receiving a request byte. A [`TriggerSource`] decides when the session sends
//! one. It is not used in streaming mode.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Source of measurement requests.
#[async_trait]
pub trait TriggerSource: Send {
    /// Wait for the next request. `None` means no more requests will come.
    async fn next_trigger(&mut self) -> Option<()>;
}

/// Trigger fed by an mpsc channel, one request per message.
pub struct ChannelTrigger {
    rx: mpsc::Receiver<()>,
}

impl ChannelTrigger {
    /// Create the trigger and the sender used to fire it.
    pub fn pair(capacity: usize) -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl TriggerSource for ChannelTrigger {
    async fn next_trigger(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// One request per line read on standard input (the operator presses Enter).
pub struct StdinTrigger {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl StdinTrigger {
    /// Read from the process standard input.
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerSource for StdinTrigger {
    async fn next_trigger(&mut self) -> Option<()> {
        match self.lines.next_line().await {
            Ok(Some(_)) => Some(()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Standard input unreadable, no more requests");
                None
            }
        }
    }
}

/// Trigger that never fires. Stands in when streaming mode needs none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverTrigger;

#[async_trait]
impl TriggerSource for NeverTrigger {
    async fn next_trigger(&mut self) -> Option<()> {
        std::future::pending().await
    }
}
