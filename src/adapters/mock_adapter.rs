//! Mock byte channel for testing
//!
//! A scripted [`ByteChannel`] that needs no device on the other side. It provides:
//! - Incoming bytes pushed by the test through a [`MockAdapterHandle`]
//! - Optional automatic replies to every write
//! - Controllable failure injection
//! - A log of everything written, for verification
//!
//! For a device that actually speaks the protocol, see
//! [`MockResistivimeter`](crate::hardware::mock::MockResistivimeter).

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::ByteChannel;
use crate::error::{AppResult, DaqError};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

enum Incoming {
    Data(Vec<u8>),
    HangUp,
}

struct Shared {
    written: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    should_fail_next: AtomicBool,
}

/// Mock byte channel
///
/// # Example
///
/// ```
/// use resistes_daq::adapters::{ByteChannel, MockAdapter};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let (mut channel, handle) = MockAdapter::pair();
/// handle.push_incoming(&[0x01, 0x02]);
/// let bytes = channel.read_exact(2, Duration::from_millis(10)).await.unwrap();
/// assert_eq!(bytes, vec![0x01, 0x02]);
/// # })
/// ```
pub struct MockAdapter {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    pending: BytesMut,
    responder: Option<Responder>,
    hung_up: bool,
}

/// Test-side controls of a [`MockAdapter`].
#[derive(Clone)]
pub struct MockAdapterHandle {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedSender<Incoming>,
}

impl MockAdapter {
    /// Create a channel and the handle driving it.
    pub fn pair() -> (Self, MockAdapterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            written: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            should_fail_next: AtomicBool::new(false),
        });
        let adapter = Self {
            shared: shared.clone(),
            incoming: rx,
            pending: BytesMut::new(),
            responder: None,
            hung_up: false,
        };
        (adapter, MockAdapterHandle { shared, incoming: tx })
    }

    /// Reply to every write with the bytes returned by `responder`.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(DaqError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    async fn receive(&mut self) -> AppResult<()> {
        if self.hung_up {
            return Err(DaqError::ChannelClosed);
        }
        match self.incoming.recv().await {
            Some(Incoming::Data(bytes)) => {
                self.pending.extend_from_slice(&bytes);
                Ok(())
            }
            Some(Incoming::HangUp) | None => {
                self.hung_up = true;
                Err(DaqError::ChannelClosed)
            }
        }
    }
}

#[async_trait]
impl ByteChannel for MockAdapter {
    async fn write(&mut self, bytes: &[u8], _timeout: Duration) -> AppResult<()> {
        self.ensure_open()?;
        if self.shared.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(DaqError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.shared
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(bytes.to_vec());
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(bytes);
            self.pending.extend_from_slice(&reply);
        }
        Ok(())
    }

    async fn read_exact(&mut self, n: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        self.ensure_open()?;
        let fill = async {
            while self.pending.len() < n {
                self.receive().await?;
            }
            Ok::<(), DaqError>(())
        };
        tokio::time::timeout(timeout, fill)
            .await
            .map_err(|_| DaqError::Timeout(timeout))??;
        Ok(self.pending.split_to(n).to_vec())
    }

    async fn read_some(&mut self, timeout: Duration) -> AppResult<Vec<u8>> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            match tokio::time::timeout(timeout, self.receive()).await {
                Ok(result) => result?,
                Err(_) => return Ok(Vec::new()),
            }
        }
        Ok(self.pending.split().to_vec())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.pending.clear();
        self.incoming.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.hung_up || self.shared.closed.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        "mock-adapter".to_string()
    }
}

impl MockAdapterHandle {
    /// Make `bytes` available to the channel.
    pub fn push_incoming(&self, bytes: &[u8]) {
        // Sending fails only once the channel is closed, which tests observe separately.
        let _ = self.incoming.send(Incoming::Data(bytes.to_vec()));
    }

    /// Push `chunk` every `period` until the channel is closed.
    pub fn stream_forever(&self, chunk: Vec<u8>, period: Duration) {
        let tx = self.incoming.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if tx.send(Incoming::Data(chunk.clone())).is_err() {
                    break;
                }
            }
        });
    }

    /// Simulate the peer going away.
    pub fn hang_up(&self) {
        let _ = self.incoming.send(Incoming::HangUp);
    }

    /// Make the next write fail with an I/O error.
    pub fn trigger_failure(&self) {
        self.shared.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Everything written so far, one entry per write.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether the channel was released by its owner.
    pub fn is_released(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn writes_are_logged() {
        let (mut channel, handle) = MockAdapter::pair();
        channel.write(&[0x81], WRITE_TIMEOUT).await.unwrap();
        channel.write(&[0x80], WRITE_TIMEOUT).await.unwrap();
        assert_eq!(handle.written(), vec![vec![0x81], vec![0x80]]);
    }

    #[tokio::test]
    async fn responder_answers_writes() {
        let (channel, _handle) = MockAdapter::pair();
        let mut channel = channel.with_responder(|bytes| bytes.iter().rev().copied().collect());
        channel.write(&[1, 2, 3], WRITE_TIMEOUT).await.unwrap();
        let reply = channel.read_exact(3, Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn failure_injection_hits_one_write() {
        let (mut channel, handle) = MockAdapter::pair();
        handle.trigger_failure();
        assert!(matches!(channel.write(&[1], WRITE_TIMEOUT).await, Err(DaqError::Io(_))));
        assert!(channel.write(&[1], WRITE_TIMEOUT).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (mut channel, _handle) = MockAdapter::pair();
        let err = channel
            .read_exact(11, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::Timeout(_)));
    }

    #[tokio::test]
    async fn hang_up_closes_channel() {
        let (mut channel, handle) = MockAdapter::pair();
        handle.push_incoming(&[1]);
        handle.hang_up();
        let err = channel.read_exact(2, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DaqError::ChannelClosed));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn close_releases_and_refuses_io() {
        let (mut channel, handle) = MockAdapter::pair();
        channel.close().await.unwrap();
        assert!(handle.is_released());
        assert!(matches!(channel.write(&[1], WRITE_TIMEOUT).await, Err(DaqError::ChannelClosed)));
        assert!(matches!(
            channel.read_exact(1, Duration::from_millis(1)).await,
            Err(DaqError::ChannelClosed)
        ));
    }
}
