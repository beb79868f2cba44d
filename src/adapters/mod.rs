//! Byte channels
//!
//! Duplex byte transports the acquisition session talks through. Every
//! implementation buffers partially received data internally, so a read that
//! is cancelled or times out never loses bytes.
//!
//! | URL | channel |
//! |---|---|
//! | `serial:/dev/ttyUSB0:19200:8N1` | [`serial_adapter`] (feature `instrument_serial`) |
//! | `tcp:192.168.0.10:4001` | [`tcp_adapter`] |
//! | `mock:` | simulated resistivimeter, see [`crate::hardware::mock`] |

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AppResult, DaqError};

pub mod mock_adapter;
pub mod stream;
pub mod tcp_adapter;
pub mod url;

#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock_adapter::{MockAdapter, MockAdapterHandle};
pub use stream::StreamChannel;
pub use url::{ChannelUrl, Framing, Parity};

/// Default quiet period used when flushing the reception buffer.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Duplex byte transport exclusively owned by one acquisition session.
#[async_trait]
pub trait ByteChannel: Send {
    /// Write all of `bytes` within `timeout`.
    ///
    /// Not cancel-safe: callers let a write run to completion or to its
    /// timeout, never drop it midway.
    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> AppResult<()>;

    /// Read exactly `n` bytes within `timeout`.
    ///
    /// Cancel-safe: bytes received before a timeout or cancellation stay
    /// buffered for the next call.
    async fn read_exact(&mut self, n: usize, timeout: Duration) -> AppResult<Vec<u8>>;

    /// Return whatever is available within `timeout`, or an empty buffer.
    async fn read_some(&mut self, timeout: Duration) -> AppResult<Vec<u8>>;

    /// Release the transport. Later reads and writes fail with `ChannelClosed`.
    async fn close(&mut self) -> AppResult<()>;

    /// Whether [`ByteChannel::close`] ran or the peer went away.
    fn is_closed(&self) -> bool;

    /// Human readable description for logs.
    fn describe(&self) -> String;

    /// Discard incoming bytes until the line stays quiet for `quiet`.
    ///
    /// Returns the number of discarded bytes, or `BufferNotDrained` when data
    /// keeps arriving for longer than `limit`.
    async fn drain(&mut self, quiet: Duration, limit: Duration) -> AppResult<usize> {
        let start = tokio::time::Instant::now();
        let mut discarded = 0;
        loop {
            let chunk = self.read_some(quiet).await?;
            if chunk.is_empty() {
                return Ok(discarded);
            }
            discarded += chunk.len();
            if start.elapsed() > limit {
                log::error!("Reception buffer still busy after {:?}", limit);
                return Err(DaqError::BufferNotDrained(limit));
            }
        }
    }
}

/// Open a byte channel from a connection URL.
///
/// `timeout` bounds the connection attempt.
pub async fn open_channel(url: &str, timeout: Duration) -> AppResult<Box<dyn ByteChannel>> {
    let parsed = ChannelUrl::parse(url)?;
    log::info!("Opening byte channel {}", parsed);

    match parsed {
        ChannelUrl::Serial { port, baud, framing } => {
            #[cfg(feature = "instrument_serial")]
            {
                let channel = serial_adapter::open(&port, baud, framing, timeout)?;
                Ok(Box::new(channel))
            }
            #[cfg(not(feature = "instrument_serial"))]
            {
                let _ = (port, baud, framing, timeout);
                Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
            }
        }
        ChannelUrl::Tcp { host, port } => {
            let channel = tcp_adapter::connect(&host, port, timeout).await?;
            Ok(Box::new(channel))
        }
        ChannelUrl::Mock => {
            let channel = crate::hardware::mock::MockResistivimeter::default().spawn();
            Ok(Box::new(channel))
        }
    }
}
