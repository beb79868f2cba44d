//! Generic byte channel over any tokio `AsyncRead + AsyncWrite` stream.
//!
//! Received bytes accumulate in a `BytesMut` owned by the channel, which is what
//! makes [`ByteChannel::read_exact`] cancel-safe.

use async_trait::async_trait;
use bytes::BytesMut;
use log::{debug, trace};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ByteChannel;
use crate::error::{hex, AppResult, DaqError};

const READ_CHUNK: usize = 256;

/// Byte channel wrapping a tokio stream.
pub struct StreamChannel<S> {
    inner: Option<S>,
    pending: BytesMut,
    label: String,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `stream`; `label` appears in logs.
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            inner: Some(stream),
            pending: BytesMut::with_capacity(READ_CHUNK),
            label: label.into(),
        }
    }

    /// Bytes received but not handed out yet.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Read once from the stream into the pending buffer.
    async fn fill(&mut self) -> AppResult<usize> {
        let stream = self.inner.as_mut().ok_or(DaqError::ChannelClosed)?;
        self.pending.reserve(READ_CHUNK);
        match stream.read_buf(&mut self.pending).await {
            Ok(0) => {
                debug!("{}: end of stream", self.label);
                self.inner = None;
                Err(DaqError::ChannelClosed)
            }
            Ok(n) => {
                trace!("{}: received {}", self.label, hex(&self.pending[self.pending.len() - n..]));
                Ok(n)
            }
            Err(e) => {
                self.inner = None;
                Err(match e.kind() {
                    std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof => DaqError::ChannelClosed,
                    _ => DaqError::Io(e),
                })
            }
        }
    }

    async fn fill_to(&mut self, n: usize) -> AppResult<()> {
        while self.pending.len() < n {
            self.fill().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S> ByteChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> AppResult<()> {
        let stream = self.inner.as_mut().ok_or(DaqError::ChannelClosed)?;
        debug!("{}: send {}", self.label, hex(bytes));
        let sent = tokio::time::timeout(timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| DaqError::Timeout(timeout))?;
        sent.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => DaqError::ChannelClosed,
            _ => DaqError::Io(e),
        })
    }

    async fn read_exact(&mut self, n: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        if self.pending.len() < n {
            if self.inner.is_none() {
                return Err(DaqError::ChannelClosed);
            }
            tokio::time::timeout(timeout, self.fill_to(n))
                .await
                .map_err(|_| DaqError::Timeout(timeout))??;
        }
        Ok(self.pending.split_to(n).to_vec())
    }

    async fn read_some(&mut self, timeout: Duration) -> AppResult<Vec<u8>> {
        if self.pending.is_empty() {
            if self.inner.is_none() {
                return Err(DaqError::ChannelClosed);
            }
            match tokio::time::timeout(timeout, self.fill()).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => return Ok(Vec::new()),
            }
        }
        Ok(self.pending.split().to_vec())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.pending.clear();
        if let Some(mut stream) = self.inner.take() {
            debug!("{}: closing", self.label);
            if let Err(e) = stream.shutdown().await {
                debug!("{}: shutdown error ignored: {}", self.label, e);
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
