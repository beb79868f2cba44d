//! Serial transport for RS-232 / USB-serial links.
//!
//! Opened with `tokio-serial` in native async mode; no flow control, the
//! resistivimeter does not use RTS/CTS.

use log::info;
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::url::{Framing, Parity};
use super::StreamChannel;
use crate::error::{AppResult, DaqError};

/// Byte channel over a serial port.
pub type SerialChannel = StreamChannel<SerialStream>;

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    if bits == 2 {
        tokio_serial::StopBits::Two
    } else {
        tokio_serial::StopBits::One
    }
}

/// Open `port` with the given line settings.
///
/// # Errors
/// `ConnectionError` if the port does not exist or is busy.
pub fn open(port: &str, baud: u32, framing: Framing, timeout: Duration) -> AppResult<SerialChannel> {
    let stream = tokio_serial::new(port, baud)
        .data_bits(data_bits(framing.data_bits))
        .parity(parity(framing.parity))
        .stop_bits(stop_bits(framing.stop_bits))
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
        .open_native_async()
        .map_err(|e| DaqError::ConnectionError(format!("serial port {}: {}", port, e)))?;

    info!("Opened serial port {} at {} baud ({})", port, baud, framing);
    Ok(StreamChannel::new(stream, format!("serial:{}", port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_maps_to_line_settings() {
        let framing = Framing::parse("7O2").unwrap();
        assert_eq!(data_bits(framing.data_bits), tokio_serial::DataBits::Seven);
        assert_eq!(parity(framing.parity), tokio_serial::Parity::Odd);
        assert_eq!(stop_bits(framing.stop_bits), tokio_serial::StopBits::Two);
    }

    #[tokio::test]
    async fn missing_port_is_a_connection_error() {
        let err = open(
            "/dev/does-not-exist-resistes",
            19200,
            Framing::default(),
            Duration::from_millis(100),
        )
        .err();
        assert!(matches!(err, Some(DaqError::ConnectionError(_))));
    }
}
