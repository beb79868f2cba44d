//! Connection URL grammar: `scheme:address:params...`
//!
//! ```text
//! serial:/dev/ttyUSB0:19200:8N1
//! serial:COM3:38400
//! serial:/dev/ttyS0
//! tcp:192.168.1.20:4001
//! mock:
//! ```
//!
//! Serial parameters are optional and parsed from the right, so port names
//! may themselves contain colons.

use std::fmt;

use crate::error::{AppResult, DaqError};
use crate::validation::{is_not_empty, is_valid_port};

/// Baud rate used when the URL does not give one.
pub const DEFAULT_BAUD: u32 = 19200;

/// Parity bit setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Character framing such as `8N1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Data bits, 5 to 8
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits, 1 or 2
    pub stop_bits: u8,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl Framing {
    /// Parse `8N1`-style framing, `None` when `s` is not one.
    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let (d, p, st) = (chars.next()?, chars.next()?, chars.next()?);
        if chars.next().is_some() {
            return None;
        }
        let data_bits = d.to_digit(10).filter(|d| (5..=8).contains(d))? as u8;
        let parity = match p.to_ascii_uppercase() {
            'N' => Parity::None,
            'E' => Parity::Even,
            'O' => Parity::Odd,
            _ => return None,
        };
        let stop_bits = st.to_digit(10).filter(|s| *s == 1 || *s == 2)? as u8;
        Some(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(f, "{}{}{}", self.data_bits, parity, self.stop_bits)
    }
}

/// A parsed connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelUrl {
    /// Serial line
    Serial {
        /// Device path or name
        port: String,
        /// Baud rate
        baud: u32,
        /// Character framing
        framing: Framing,
    },
    /// TCP socket (serial-to-ethernet bridge)
    Tcp {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
    /// In-process simulated device
    Mock,
}

impl ChannelUrl {
    /// Parse a connection URL.
    ///
    /// # Errors
    /// `ConnectionError` describing what is wrong with `url`.
    pub fn parse(url: &str) -> AppResult<Self> {
        let bad = |why: &str| DaqError::ConnectionError(format!("invalid URL '{}': {}", url, why));

        let (scheme, rest) = url.split_once(':').ok_or_else(|| bad("missing scheme"))?;
        match scheme.to_ascii_lowercase().as_str() {
            "serial" => {
                let mut parts: Vec<&str> = rest.split(':').collect();
                let mut framing = Framing::default();
                let mut baud = DEFAULT_BAUD;

                if parts.len() > 1 {
                    if let Some(f) = parts.last().and_then(|s| Framing::parse(s)) {
                        framing = f;
                        parts.pop();
                    }
                }
                if parts.len() > 1 {
                    if let Some(b) = parts.last().and_then(|s| s.parse::<u32>().ok()) {
                        if b == 0 {
                            return Err(bad("baud rate must be greater than 0"));
                        }
                        baud = b;
                        parts.pop();
                    }
                }

                let port = parts.join(":");
                is_not_empty(&port).map_err(bad)?;
                Ok(ChannelUrl::Serial {
                    port,
                    baud,
                    framing,
                })
            }
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(|| bad("expected tcp:host:port"))?;
                is_not_empty(host).map_err(bad)?;
                let port: u16 = port.parse().map_err(|_| bad("port is not a number"))?;
                is_valid_port(port).map_err(bad)?;
                Ok(ChannelUrl::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "mock" => Ok(ChannelUrl::Mock),
            other => Err(bad(&format!("unsupported scheme '{}'", other))),
        }
    }
}

impl fmt::Display for ChannelUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelUrl::Serial {
                port,
                baud,
                framing,
            } => write!(f, "serial:{}:{}:{}", port, baud, framing),
            ChannelUrl::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
            ChannelUrl::Mock => f.write_str("mock:"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_serial_url() {
        let url = ChannelUrl::parse("serial:/dev/ttyUSB0:38400:8N1").unwrap();
        assert_eq!(
            url,
            ChannelUrl::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: 38400,
                framing: Framing::default(),
            }
        );
        assert_eq!(url.to_string(), "serial:/dev/ttyUSB0:38400:8N1");
    }

    #[test]
    fn serial_defaults() {
        match ChannelUrl::parse("serial:COM3").unwrap() {
            ChannelUrl::Serial { port, baud, framing } => {
                assert_eq!(port, "COM3");
                assert_eq!(baud, DEFAULT_BAUD);
                assert_eq!(framing, Framing::default());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn serial_framing_without_baud() {
        match ChannelUrl::parse("serial:/dev/ttyS1:7E2").unwrap() {
            ChannelUrl::Serial { baud, framing, .. } => {
                assert_eq!(baud, DEFAULT_BAUD);
                assert_eq!(framing.data_bits, 7);
                assert_eq!(framing.parity, Parity::Even);
                assert_eq!(framing.stop_bits, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tcp_url() {
        assert_eq!(
            ChannelUrl::parse("tcp:10.0.0.5:4001").unwrap(),
            ChannelUrl::Tcp {
                host: "10.0.0.5".into(),
                port: 4001
            }
        );
    }

    #[test]
    fn rejected_urls() {
        for url in [
            "",
            "ttyUSB0",
            "serial:",
            "serial::19200",
            "serial:/dev/ttyUSB0:0",
            "tcp:host",
            "tcp::4001",
            "tcp:host:0",
            "tcp:host:http",
            "ftp:host:21",
        ] {
            assert!(
                matches!(ChannelUrl::parse(url), Err(DaqError::ConnectionError(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn mock_url() {
        assert_eq!(ChannelUrl::parse("mock:").unwrap(), ChannelUrl::Mock);
    }
}
