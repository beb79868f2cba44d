//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, used by every layer of the
//! crate: the value and frame codecs, the byte channels, the acquisition session and
//! the output sinks. Using the `thiserror` crate, it provides a centralized and
//! consistent way for callers to branch on what went wrong.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidParameter`**: An acquisition parameter is out of the device range. Raised
//!   before any byte reaches the device, so the caller can correct the input and retry.
//! - **`ConnectionError`**: The byte channel could not be opened (bad URL, missing port,
//!   refused TCP connection).
//! - **`Timeout`**: No bytes arrived within the deadline. Recoverable while streaming,
//!   fatal during the configuration handshake.
//! - **`BadAck`**: The device did not echo the configuration frame. Carries both byte
//!   sequences for diagnosis. Never retried.
//! - **`MalformedFrame`**: A measurement frame with the wrong length or broken sync bits.
//!   Surfaced to the sink, then the stream resynchronises.
//! - **`ChannelClosed`**: The transport is gone. Always ends the session.
//! - **`BufferNotDrained`**: The device kept talking while the receive buffer was flushed.
//! - **`Config`** / **`Configuration`**: Settings file parsing and semantic validation.
//! - **`FeatureNotEnabled`**: Functionality compiled out through feature flags.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types,
//! simplifying error handling with the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Error kinds raised by the protocol layer and its collaborators.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Invalid parameter '{field}': {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("No data received within {0:?}")]
    Timeout(Duration),

    #[error("Bad acknowledgement: sent [{}], received [{}]", hex(.sent), hex(.received))]
    BadAck { sent: Vec<u8>, received: Vec<u8> },

    #[error("Malformed measure frame: {0}")]
    MalformedFrame(String),

    #[error("Byte channel closed")]
    ChannelClosed,

    #[error("Reception buffer still receiving data after {0:?}")]
    BufferNotDrained(Duration),

    #[error("Session already terminated ({0})")]
    SessionTerminated(String),

    #[error("Operation not allowed while the session is {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Builds an [`DaqError::InvalidParameter`] for `field`.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DaqError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    /// Whether a streaming loop may keep reading after this error.
    ///
    /// Only a missing sample and a garbled frame are recoverable; everything else
    /// (most importantly a closed channel) ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DaqError::Timeout(_) | DaqError::MalformedFrame(_))
    }
}

/// Formats bytes as space separated upper-case hex, the way device traces are written.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_ack_message_shows_both_frames() {
        let err = DaqError::BadAck {
            sent: vec![0xF5, 0x03],
            received: vec![0xB0, 0x80, 0x90],
        };
        let msg = err.to_string();
        assert!(msg.contains("F5 03"));
        assert!(msg.contains("B0 80 90"));
    }

    #[test]
    fn only_timeout_and_malformed_frame_are_recoverable() {
        assert!(DaqError::Timeout(Duration::from_secs(1)).is_recoverable());
        assert!(DaqError::MalformedFrame("short".into()).is_recoverable());
        assert!(!DaqError::ChannelClosed.is_recoverable());
        assert!(!DaqError::invalid("voltage", "too low").is_recoverable());
        assert!(!DaqError::BadAck {
            sent: vec![],
            received: vec![]
        }
        .is_recoverable());
    }

    #[test]
    fn invalid_parameter_names_the_field() {
        let err = DaqError::invalid("channels_nb", "must be between 1 and 255, got 0");
        assert_eq!(
            err.to_string(),
            "Invalid parameter 'channels_nb': must be between 1 and 255, got 0"
        );
    }

    #[test]
    fn hex_formats_empty_and_single_bytes() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[0x0A]), "0A");
    }
}
