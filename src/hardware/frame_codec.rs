//! Frame codec
//!
//! Binary frames exchanged with the resistivimeter. Every multi-byte value is
//! split into 7-bit groups, least significant first; bit 7 of each byte is a
//! synchronisation marker.
//!
//! # Configuration frame (10 bytes, host to device)
//!
//! ```text
//! Byte 0 : 1  U5  U4  U3  U2  U1  U0   1     voltage code Ux
//! Byte 1 : 0   0   0   0   0   0  U7  U6
//! Byte 2 : 0  F6  F5  F4  F3  F2  F1  F0     frequency code Fx
//! Byte 3 : 0 F13 F12 F11 F10  F9  F8  F7
//! Byte 4 : 0 F20 F19 F18 F17 F16 F15 F14
//! Byte 5 : 0   0   0   0 F24 F23 F22 F21
//! Byte 6 : 0  I6  I5  I4  I3  I2  I1  I0     external impulsions
//! Byte 7 : 0  V6  V5  V4  V3  V2  V1  V0     channels
//! Byte 8 : 0  T6  T5  T4  T3  T2  T1  T0     integration constant
//! Byte 9 : 0 T13 T12 T11 T10  T9  T8  T7
//! ```
//!
//! # Acknowledgement (11 bytes, device to host)
//!
//! The ten configuration bytes echoed back, followed by a status byte
//! `0 Id5 Id4 Id3 Id2 Id1 Id0 Fct0` (board identifier and run flag).
//!
//! # Measure frame (14 + 8 * channels bytes, device to host)
//!
//! | offset | width | field | marker bytes |
//! |---|---|---|---|
//! | 0 | 2 | count | `1 1` |
//! | 2 | 2 | receiver battery | `1 0` |
//! | 4 | 2 | emitter battery | `1 0` |
//! | 6 | 4 | phase current | `1 0 0 0` |
//! | 10 | 4 | quadrature current | `1 0 0 0` |
//! | 14 + 8n | 4 | phase potential, channel n | `1 0 0 0` |
//! | 18 + 8n | 4 | quadrature potential, channel n | `1 0 0 0` |
//!
//! 28-bit values above `2^27` are negative (`value - 2^28`).

use std::fmt;

use crate::error::{hex, AppResult, DaqError};
use crate::hardware::params::DeviceConfig;
use crate::hardware::value_codec::ValueCodec;

/// Configuration frame length
pub const CONFIG_FRAME_LEN: usize = 10;
/// Acknowledgement frame length
pub const ACK_FRAME_LEN: usize = CONFIG_FRAME_LEN + 1;
/// Fixed part of a measure frame
pub const MEASURE_HEADER_LEN: usize = 14;
/// Bytes per channel in a measure frame
pub const MEASURE_CHANNEL_LEN: usize = 8;
/// Single byte requesting one measure in manual mode
pub const REQUEST_MEASURE_CMD: u8 = 0x80;

const CONFIG_OPCODE: u8 = 0x81;
const SYNC: u8 = 0x80;
const SEVEN_BITS: u32 = 0x7F;
const TWO_POW_27: i64 = 1 << 27;
const TWO_POW_28: i64 = 1 << 28;

/// Marker pattern at the start of every measure frame.
const FRAME_HEADER_MARKERS: [bool; 4] = [true, true, true, false];

/// Device codes carried by a configuration frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodedParams {
    /// Voltage code
    pub ux: u8,
    /// Frequency code (25 bits)
    pub fx: u32,
    /// External impulsions (7 bits)
    pub impuls: u8,
    /// Channels (7 bits on the wire)
    pub channels: u8,
    /// Integration constant (14 bits)
    pub integration: u16,
}

/// A 10-byte configuration frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConfigFrame([u8; CONFIG_FRAME_LEN]);

impl ConfigFrame {
    /// Lay out coded parameters as a frame.
    pub fn from_coded(coded: &CodedParams) -> Self {
        let ux = u32::from(coded.ux);
        let fx = coded.fx;
        let integration = u32::from(coded.integration);
        Self([
            CONFIG_OPCODE + ((ux & 0x3F) << 1) as u8,
            ((ux & 0xC0) >> 6) as u8,
            (fx & SEVEN_BITS) as u8,
            ((fx >> 7) & SEVEN_BITS) as u8,
            ((fx >> 14) & SEVEN_BITS) as u8,
            ((fx >> 21) & SEVEN_BITS) as u8,
            coded.impuls & 0x7F,
            coded.channels & 0x7F,
            (integration & SEVEN_BITS) as u8,
            ((integration >> 7) & SEVEN_BITS) as u8,
        ])
    }

    /// Wrap raw bytes received from a host (used by the simulated device).
    pub fn from_bytes(bytes: [u8; CONFIG_FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; CONFIG_FRAME_LEN] {
        &self.0
    }
}

impl fmt::Debug for ConfigFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigFrame[{}]", hex(&self.0))
    }
}

impl fmt::Display for ConfigFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// Encode a validated configuration into its frame.
///
/// All encoders run before any byte is produced.
///
/// # Errors
/// `InvalidParameter` from the value codec when the constants table in `codec`
/// is stricter than the one `config` was validated with.
pub fn build_config_frame(config: &DeviceConfig, codec: &ValueCodec) -> AppResult<ConfigFrame> {
    let coded = CodedParams {
        ux: codec.encode_voltage(config.voltage())?,
        fx: codec.encode_frequency(config.frequency())?,
        ..*config.coded()
    };
    let frame = ConfigFrame::from_coded(&coded);
    tracing::debug!(frame = %frame, "Configuration frame built");
    Ok(frame)
}

/// Recover coded parameters from a configuration frame.
///
/// # Errors
/// `MalformedFrame` when the opcode bits or the 7-bit markers are wrong.
pub fn decode_config_frame(frame: &ConfigFrame) -> AppResult<CodedParams> {
    let b = frame.as_bytes();
    if b[0] & CONFIG_OPCODE != CONFIG_OPCODE {
        return Err(DaqError::MalformedFrame(format!(
            "configuration opcode missing in {}",
            frame
        )));
    }
    if let Some(pos) = b[1..].iter().position(|byte| byte & SYNC != 0) {
        return Err(DaqError::MalformedFrame(format!(
            "configuration byte {} has bit 7 set in {}",
            pos + 1,
            frame
        )));
    }

    let ux = ((b[0] >> 1) & 0x3F) | ((b[1] & 0x03) << 6);
    let fx = u32::from(b[2])
        | (u32::from(b[3]) << 7)
        | (u32::from(b[4]) << 14)
        | (u32::from(b[5]) << 21);
    Ok(CodedParams {
        ux,
        fx,
        impuls: b[6],
        channels: b[7],
        integration: u16::from(b[8]) | (u16::from(b[9]) << 7),
    })
}

/// Status reported in the last acknowledgement byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckStatus {
    /// Acquisition running flag (`Fct0`)
    pub running: bool,
    /// Board identifier (`Id5..Id0`)
    pub board_id: u8,
}

impl AckStatus {
    /// Decode the status byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            running: byte & 0x01 != 0,
            board_id: (byte & 0x7E) >> 1,
        }
    }

    /// Encode the status byte.
    pub fn to_byte(self) -> u8 {
        ((self.board_id & 0x3F) << 1) | u8::from(self.running)
    }
}

/// Check the device acknowledgement against the frame that was sent.
///
/// # Errors
/// `BadAck` carrying both sequences when the length is not 11, any echoed byte
/// differs, or the status byte has bit 7 set.
pub fn validate_ack(sent: &ConfigFrame, received: &[u8]) -> AppResult<AckStatus> {
    let bad = || DaqError::BadAck {
        sent: sent.as_bytes().to_vec(),
        received: received.to_vec(),
    };

    if received.len() != ACK_FRAME_LEN {
        return Err(bad());
    }
    let (echo, status) = received.split_at(CONFIG_FRAME_LEN);
    if echo != sent.as_bytes() || status[0] & SYNC != 0 {
        return Err(bad());
    }
    Ok(AckStatus::from_byte(status[0]))
}

/// Build the acknowledgement a healthy device returns for `sent`.
pub fn expected_ack(sent: &ConfigFrame, status: AckStatus) -> [u8; ACK_FRAME_LEN] {
    let mut ack = [0u8; ACK_FRAME_LEN];
    ack[..CONFIG_FRAME_LEN].copy_from_slice(sent.as_bytes());
    ack[CONFIG_FRAME_LEN] = status.to_byte();
    ack
}

/// Phase and quadrature potential codes of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelCodes {
    /// Phase potential code
    pub phase: i32,
    /// Quadrature potential code
    pub quad: i32,
}

/// Raw content of a measure frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeasureFrame {
    /// Sequence counter (14 bits)
    pub count: u16,
    /// Receiver battery code (14 bits)
    pub rec_battery: u16,
    /// Emitter battery code (14 bits)
    pub em_battery: u16,
    /// Phase current code
    pub phase_current: i32,
    /// Quadrature current code
    pub quad_current: i32,
    /// Potential codes, one entry per channel
    pub channels: Vec<ChannelCodes>,
}

/// Measure frame length for `channels_nb` channels.
pub fn measure_frame_len(channels_nb: usize) -> usize {
    MEASURE_HEADER_LEN + channels_nb * MEASURE_CHANNEL_LEN
}

/// Read one 7-bit grouped field, checking its marker bits.
fn read_field(raw: &[u8], offset: usize, width: usize, marked: usize, name: &str) -> AppResult<u32> {
    let bytes = &raw[offset..offset + width];
    let mut value = 0u32;
    for (i, byte) in bytes.iter().enumerate() {
        let expect_marker = i < marked;
        if (byte & SYNC != 0) != expect_marker {
            return Err(DaqError::MalformedFrame(format!(
                "{} byte {} (offset {}) = {:02X}, bit 7 should be {}",
                name,
                i,
                offset + i,
                byte,
                u8::from(expect_marker)
            )));
        }
        value |= u32::from(byte & 0x7F) << (7 * i);
    }
    Ok(value)
}

fn read_signed28(raw: &[u8], offset: usize, name: &str) -> AppResult<i32> {
    let value = i64::from(read_field(raw, offset, 4, 1, name)?);
    let signed = if value > TWO_POW_27 { value - TWO_POW_28 } else { value };
    Ok(signed as i32)
}

/// Parse a measure frame.
///
/// # Errors
/// `MalformedFrame` when `raw` is not `14 + 8 * channels_nb` bytes long or a
/// marker bit is wrong.
pub fn decode_measure_frame(raw: &[u8], channels_nb: usize) -> AppResult<MeasureFrame> {
    let expected = measure_frame_len(channels_nb);
    if raw.len() != expected {
        return Err(DaqError::MalformedFrame(format!(
            "expected {} bytes for {} channel(s), got {}",
            expected,
            channels_nb,
            raw.len()
        )));
    }

    let count = read_field(raw, 0, 2, 2, "count")? as u16;
    let rec_battery = read_field(raw, 2, 2, 1, "receiver battery")? as u16;
    let em_battery = read_field(raw, 4, 2, 1, "emitter battery")? as u16;
    let phase_current = read_signed28(raw, 6, "phase current")?;
    let quad_current = read_signed28(raw, 10, "quadrature current")?;

    let channels = (0..channels_nb)
        .map(|n| {
            let base = MEASURE_HEADER_LEN + n * MEASURE_CHANNEL_LEN;
            Ok(ChannelCodes {
                phase: read_signed28(raw, base, "phase potential")?,
                quad: read_signed28(raw, base + 4, "quadrature potential")?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(MeasureFrame {
        count,
        rec_battery,
        em_battery,
        phase_current,
        quad_current,
        channels,
    })
}

fn push_field(out: &mut Vec<u8>, value: u32, width: usize, marked: usize) {
    for i in 0..width {
        let group = ((value >> (7 * i)) & SEVEN_BITS) as u8;
        out.push(if i < marked { group | SYNC } else { group });
    }
}

fn push_signed28(out: &mut Vec<u8>, value: i32) {
    let raw = (i64::from(value).rem_euclid(TWO_POW_28)) as u32;
    push_field(out, raw, 4, 1);
}

/// Serialize a measure frame the way the device does.
///
/// Counter and battery codes are truncated to 14 bits, signed codes to 28 bits.
pub fn encode_measure_frame(frame: &MeasureFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(measure_frame_len(frame.channels.len()));
    push_field(&mut out, u32::from(frame.count), 2, 2);
    push_field(&mut out, u32::from(frame.rec_battery), 2, 1);
    push_field(&mut out, u32::from(frame.em_battery), 2, 1);
    push_signed28(&mut out, frame.phase_current);
    push_signed28(&mut out, frame.quad_current);
    for ch in &frame.channels {
        push_signed28(&mut out, ch.phase);
        push_signed28(&mut out, ch.quad);
    }
    out
}

/// Offset of the next plausible measure frame start after position 0.
///
/// A candidate is a position whose marker bits match the frame header
/// (`1 1 1 0`), or a prefix of it when the buffer ends early.
pub fn find_frame_start(buf: &[u8]) -> Option<usize> {
    (1..buf.len()).find(|&start| {
        buf[start..]
            .iter()
            .zip(FRAME_HEADER_MARKERS.iter())
            .all(|(byte, &marked)| (byte & SYNC != 0) == marked)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::params::AcquisitionParams;

    const TRACE_FRAME: [u8; 10] = [0xF5, 0x03, 0x00, 0x00, 0x20, 0x00, 0x01, 0x01, 0x01, 0x00];

    fn trace_config() -> (DeviceConfig, ValueCodec) {
        let codec = ValueCodec::default();
        let params = AcquisitionParams {
            voltage: 16.85,
            frequency: 976.5625,
            impuls_nb: 1,
            channels_nb: 1,
            integration_nb: 1,
        };
        (params.validate(&codec).unwrap(), codec)
    }

    fn sample_frame(channels: usize) -> MeasureFrame {
        MeasureFrame {
            count: 1234,
            rec_battery: 12000,
            em_battery: 11000,
            phase_current: 1 << 20,
            quad_current: -(1 << 16),
            channels: (0..channels)
                .map(|n| ChannelCodes {
                    phase: 1000 * (n as i32 + 1),
                    quad: -500 * (n as i32 + 1),
                })
                .collect(),
        }
    }

    #[test]
    fn trace_configuration_frame() {
        let (config, codec) = trace_config();
        let frame = build_config_frame(&config, &codec).unwrap();
        assert_eq!(frame.as_bytes(), &TRACE_FRAME);
        assert_eq!(frame.to_string(), "F5 03 00 00 20 00 01 01 01 00");
    }

    #[test]
    fn config_frame_round_trips_coded_values() {
        let codec = ValueCodec::default();
        for (voltage, frequency, impuls_nb, channels_nb, integration_nb) in [
            (16.55, 0.0, 1, 1, 0),
            (196.51, 62499.0, 127, 255, 16383),
            (42.0, 12345.678, 64, 100, 200),
        ] {
            let params = AcquisitionParams {
                voltage,
                frequency,
                impuls_nb,
                channels_nb,
                integration_nb,
            };
            let config = params.validate(&codec).unwrap();
            let frame = build_config_frame(&config, &codec).unwrap();
            assert_eq!(frame.as_bytes().len(), CONFIG_FRAME_LEN);
            assert_eq!(&decode_config_frame(&frame).unwrap(), config.coded());
        }
    }

    #[test]
    fn stricter_codec_rejects_without_frame() {
        let (config, _) = trace_config();
        let strict = ValueCodec::new(crate::hardware::constants::DeviceConstants {
            injvolt_min: 20.0,
            ..Default::default()
        });
        assert!(matches!(
            build_config_frame(&config, &strict),
            Err(DaqError::InvalidParameter { field: "voltage", .. })
        ));
    }

    #[test]
    fn ack_echo_with_status_is_accepted() {
        let sent = ConfigFrame::from_bytes(TRACE_FRAME);
        let status = AckStatus {
            running: true,
            board_id: 5,
        };
        let ack = expected_ack(&sent, status);
        assert_eq!(ack[10], 0x0B);
        assert_eq!(validate_ack(&sent, &ack).unwrap(), status);
    }

    #[test]
    fn documented_bad_ack_is_rejected() {
        let sent = ConfigFrame::from_bytes(TRACE_FRAME);
        let received = [0xB0, 0x80, 0x90, 0x61, 0xFE, 0x6B, 0xE5, 0x79, 0x09, 0x1A, 0xB0];
        match validate_ack(&sent, &received) {
            Err(DaqError::BadAck { sent: s, received: r }) => {
                assert_eq!(s, TRACE_FRAME.to_vec());
                assert_eq!(r, received.to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn any_single_byte_change_is_rejected() {
        let sent = ConfigFrame::from_bytes(TRACE_FRAME);
        let good = expected_ack(&sent, AckStatus::from_byte(0x02));
        for i in 0..CONFIG_FRAME_LEN {
            let mut ack = good;
            ack[i] ^= 0x01;
            assert!(validate_ack(&sent, &ack).is_err(), "byte {i}");
        }
        let mut ack = good;
        ack[10] |= 0x80;
        assert!(validate_ack(&sent, &ack).is_err());
    }

    #[test]
    fn ack_of_any_other_length_is_rejected() {
        let sent = ConfigFrame::from_bytes(TRACE_FRAME);
        let good = expected_ack(&sent, AckStatus::from_byte(0));
        for len in 0..=20 {
            if len == ACK_FRAME_LEN {
                continue;
            }
            let mut ack = good.to_vec();
            ack.resize(len, 0);
            assert!(validate_ack(&sent, &ack).is_err(), "len {len}");
        }
    }

    #[test]
    fn measure_frame_round_trip() {
        let frame = sample_frame(3);
        let raw = encode_measure_frame(&frame);
        assert_eq!(raw.len(), measure_frame_len(3));
        assert_eq!(decode_measure_frame(&raw, 3).unwrap(), frame);
    }

    #[test]
    fn signed_threshold_follows_device() {
        let mut raw = encode_measure_frame(&sample_frame(0));
        // phase current bytes 6..10 = 2^28 - 1
        raw[6..10].copy_from_slice(&[0xFF, 0x7F, 0x7F, 0x7F]);
        assert_eq!(decode_measure_frame(&raw, 0).unwrap().phase_current, -1);
        // exactly 2^27 stays positive
        raw[6..10].copy_from_slice(&[0x80, 0x00, 0x00, 0x40]);
        assert_eq!(decode_measure_frame(&raw, 0).unwrap().phase_current, 1 << 27);
    }

    #[test]
    fn wrong_length_is_malformed_for_every_channel_count() {
        for channels in 1..=255usize {
            let len = measure_frame_len(channels);
            let raw = vec![0u8; len + 1];
            assert!(matches!(
                decode_measure_frame(&raw, channels),
                Err(DaqError::MalformedFrame(_))
            ));
            assert!(decode_measure_frame(&raw[..len - 1], channels).is_err());
        }
    }

    #[test]
    fn broken_marker_is_malformed() {
        let mut raw = encode_measure_frame(&sample_frame(1));
        raw[15] |= 0x80;
        let err = decode_measure_frame(&raw, 1).unwrap_err();
        assert!(err.to_string().contains("phase potential"));
    }

    #[test]
    fn resync_finds_next_header() {
        let frame = encode_measure_frame(&sample_frame(1));
        let mut stream = vec![0x12, 0x34, 0x81];
        stream.extend_from_slice(&frame);
        assert_eq!(find_frame_start(&stream), Some(3));
        assert_eq!(find_frame_start(&[0x01, 0x02, 0x03]), None);
        // partial header at the tail
        assert_eq!(find_frame_start(&[0x00, 0x00, 0x81]), Some(2));
    }
}
