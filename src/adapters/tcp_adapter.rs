//! TCP transport, for resistivimeters reached through a serial-to-ethernet bridge.

use log::info;
use std::time::Duration;
use tokio::net::TcpStream;

use super::StreamChannel;
use crate::error::{AppResult, DaqError};

/// Byte channel over a TCP socket.
pub type TcpChannel = StreamChannel<TcpStream>;

/// Connect to `host:port` within `timeout`.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> AppResult<TcpChannel> {
    let address = format!("{}:{}", host, port);
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| DaqError::ConnectionError(format!("{}: connection timed out after {:?}", address, timeout)))?
        .map_err(|e| DaqError::ConnectionError(format!("{}: {}", address, e)))?;
    stream
        .set_nodelay(true)
        .map_err(|e| DaqError::ConnectionError(format!("{}: {}", address, e)))?;

    info!("Connected to {}", address);
    Ok(StreamChannel::new(stream, format!("tcp:{}", address)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ByteChannel;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn exchanges_bytes_with_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&[buf[0], 0x01]).await.unwrap();
        });

        let mut channel = connect("127.0.0.1", port, Duration::from_secs(2)).await.unwrap();
        channel.write(&[0x80], Duration::from_secs(2)).await.unwrap();
        let reply = channel.read_exact(2, Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply, vec![0x80, 0x01]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, Duration::from_secs(2)).await.err();
        assert!(matches!(err, Some(DaqError::ConnectionError(_))));
    }
}
