//! Simulated resistivimeter
//!
//! Speaks the real binary protocol over an in-memory duplex pipe so the
//! acquisition session can be exercised without hardware. All timing uses
//! `tokio::time`, so tests may run with a paused clock.
//!
//! # Behaviour
//!
//! - A configuration frame is acknowledged with its echo plus a status byte
//!   (board id, run flag set).
//! - `integration_nb > 0`: one measure frame every `1 s / integration_nb`
//!   (or the period set with [`MockResistivimeter::with_period`]).
//! - `integration_nb == 0`: one measure frame per `0x80` request byte.
//! - Unknown bytes are ignored, like the real board does.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, trace};

use crate::adapters::StreamChannel;
use crate::hardware::frame_codec::{
    decode_config_frame, encode_measure_frame, expected_ack, AckStatus, ChannelCodes, CodedParams,
    ConfigFrame, MeasureFrame, CONFIG_FRAME_LEN, REQUEST_MEASURE_CMD,
};

/// Acknowledgement returned when configured to refuse configuration.
pub const GARBLED_ACK: [u8; 11] = [0xB0, 0x80, 0x90, 0x61, 0xFE, 0x6B, 0xE5, 0x79, 0x09, 0x1A, 0xB0];

const PIPE_CAPACITY: usize = 4096;

/// Simulated device settings.
#[derive(Debug, Clone)]
pub struct MockResistivimeter {
    board_id: u8,
    rec_battery: u16,
    em_battery: u16,
    phase_current: i32,
    quad_current: i32,
    phase_potential: i32,
    quad_potential: i32,
    reject_config: bool,
    mute: bool,
    period: Option<Duration>,
    chatter: Vec<u8>,
}

impl Default for MockResistivimeter {
    fn default() -> Self {
        Self {
            board_id: 1,
            // about 12.5 V and 12.0 V
            rec_battery: 11191,
            em_battery: 10743,
            phase_current: 1 << 20,
            quad_current: -(1 << 14),
            phase_potential: 1 << 18,
            quad_potential: 1 << 12,
            reject_config: false,
            mute: false,
            period: None,
            chatter: Vec::new(),
        }
    }
}

impl MockResistivimeter {
    /// Board identifier reported in acknowledgements.
    pub fn with_board_id(mut self, board_id: u8) -> Self {
        self.board_id = board_id & 0x3F;
        self
    }

    /// Raw current codes placed in every frame.
    pub fn with_currents(mut self, phase: i32, quad: i32) -> Self {
        self.phase_current = phase;
        self.quad_current = quad;
        self
    }

    /// Raw potential codes of channel 0; channel `n` gets `(n + 1)` times these.
    pub fn with_potentials(mut self, phase: i32, quad: i32) -> Self {
        self.phase_potential = phase;
        self.quad_potential = quad;
        self
    }

    /// Answer configuration frames with [`GARBLED_ACK`].
    pub fn rejecting_config(mut self) -> Self {
        self.reject_config = true;
        self
    }

    /// Never answer anything.
    pub fn muted(mut self) -> Self {
        self.mute = true;
        self
    }

    /// Fixed streaming period instead of `1 s / integration_nb`.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Bytes sent as soon as the link opens, before any configuration.
    pub fn with_chatter(mut self, bytes: Vec<u8>) -> Self {
        self.chatter = bytes;
        self
    }

    /// The measure frame the device sends for sample `count`.
    pub fn frame(&self, count: u16, channels: usize) -> MeasureFrame {
        MeasureFrame {
            count: count & 0x3FFF,
            rec_battery: self.rec_battery,
            em_battery: self.em_battery,
            phase_current: self.phase_current,
            quad_current: self.quad_current,
            channels: (1..=channels as i32)
                .map(|k| ChannelCodes {
                    phase: self.phase_potential * k,
                    quad: self.quad_potential * k,
                })
                .collect(),
        }
    }

    /// Start the device task and return the host side of the link.
    pub fn spawn(self) -> StreamChannel<DuplexStream> {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        tokio::spawn(async move {
            if let Err(e) = self.run(device).await {
                debug!("Mock resistivimeter stopped: {}", e);
            }
        });
        StreamChannel::new(host, "mock:resistivimeter")
    }

    async fn run(self, stream: DuplexStream) -> std::io::Result<()> {
        let (mut rx, mut tx) = tokio::io::split(stream);
        if !self.chatter.is_empty() {
            tx.write_all(&self.chatter).await?;
        }

        let mut state = DeviceState::default();
        let mut buf = [0u8; 256];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                read = rx.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    pending.extend_from_slice(&buf[..n]);
                    for reply in self.process(&mut pending, &mut state) {
                        tx.write_all(&reply).await?;
                    }
                }
                _ = next_tick(&mut state.ticker) => {
                    let reply = state.next_frame(&self);
                    tx.write_all(&reply).await?;
                }
            }
        }
    }

    /// Consume complete commands from `pending`, returning the replies.
    fn process(&self, pending: &mut Vec<u8>, state: &mut DeviceState) -> Vec<Vec<u8>> {
        let mut replies = Vec::new();
        while let Some(&first) = pending.first() {
            if first == REQUEST_MEASURE_CMD {
                pending.remove(0);
                if self.mute {
                    continue;
                }
                match state.config {
                    Some(config) if config.integration == 0 => {
                        trace!("Mock resistivimeter: measure requested");
                        replies.push(state.next_frame(self));
                    }
                    _ => trace!("Mock resistivimeter: request ignored"),
                }
            } else if first & 0x81 == 0x81 {
                if pending.len() < CONFIG_FRAME_LEN {
                    break;
                }
                let mut bytes = [0u8; CONFIG_FRAME_LEN];
                bytes.copy_from_slice(&pending[..CONFIG_FRAME_LEN]);
                pending.drain(..CONFIG_FRAME_LEN);
                if let Some(reply) = self.configure(ConfigFrame::from_bytes(bytes), state) {
                    replies.push(reply);
                }
            } else {
                pending.remove(0);
            }
        }
        replies
    }

    fn configure(&self, frame: ConfigFrame, state: &mut DeviceState) -> Option<Vec<u8>> {
        if self.mute {
            return None;
        }
        if self.reject_config {
            return Some(GARBLED_ACK.to_vec());
        }
        let coded = decode_config_frame(&frame).ok()?;
        debug!(
            "Mock resistivimeter configured: Ux={} Fx={} channels={} integration={}",
            coded.ux, coded.fx, coded.channels, coded.integration
        );

        state.count = 0;
        state.config = Some(coded);
        state.ticker = if coded.integration > 0 {
            let period = self
                .period
                .unwrap_or_else(|| Duration::from_secs(1) / u32::from(coded.integration));
            Some(interval_at(Instant::now() + period, period))
        } else {
            None
        };

        let status = AckStatus {
            running: true,
            board_id: self.board_id,
        };
        Some(expected_ack(&frame, status).to_vec())
    }
}

#[derive(Default)]
struct DeviceState {
    config: Option<CodedParams>,
    count: u16,
    ticker: Option<Interval>,
}

impl DeviceState {
    fn next_frame(&mut self, device: &MockResistivimeter) -> Vec<u8> {
        let channels = self.config.map_or(0, |c| usize::from(c.channels));
        let frame = device.frame(self.count, channels);
        self.count = (self.count + 1) & 0x3FFF;
        encode_measure_frame(&frame)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ByteChannel;
    use crate::hardware::frame_codec::{
        decode_measure_frame, measure_frame_len, validate_ack, ACK_FRAME_LEN,
    };

    const AUTO_FRAME: [u8; 10] = [0xF5, 0x03, 0x00, 0x00, 0x20, 0x00, 0x01, 0x02, 0x04, 0x00];
    const MANUAL_FRAME: [u8; 10] = [0xF5, 0x03, 0x00, 0x00, 0x20, 0x00, 0x01, 0x01, 0x00, 0x00];

    #[tokio::test(start_paused = true)]
    async fn acknowledges_and_streams() {
        let mut link = MockResistivimeter::default().with_board_id(7).spawn();
        link.write(&AUTO_FRAME, Duration::from_secs(1)).await.unwrap();

        let ack = link.read_exact(ACK_FRAME_LEN, Duration::from_secs(1)).await.unwrap();
        let status = validate_ack(&ConfigFrame::from_bytes(AUTO_FRAME), &ack).unwrap();
        assert_eq!(status.board_id, 7);
        assert!(status.running);

        for expected_count in 0..3u16 {
            let raw = link
                .read_exact(measure_frame_len(2), Duration::from_secs(1))
                .await
                .unwrap();
            let frame = decode_measure_frame(&raw, 2).unwrap();
            assert_eq!(frame.count, expected_count);
            assert_eq!(frame.channels[1].phase, 2 * (1 << 18));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_waits_for_requests() {
        let mut link = MockResistivimeter::default().spawn();
        link.write(&MANUAL_FRAME, Duration::from_secs(1)).await.unwrap();
        link.read_exact(ACK_FRAME_LEN, Duration::from_secs(1)).await.unwrap();

        let nothing = link.read_some(Duration::from_secs(5)).await.unwrap();
        assert!(nothing.is_empty());

        link.write(&[REQUEST_MEASURE_CMD], Duration::from_secs(1)).await.unwrap();
        let raw = link
            .read_exact(measure_frame_len(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(decode_measure_frame(&raw, 1).unwrap().count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejecting_device_garbles_ack() {
        let mut link = MockResistivimeter::default().rejecting_config().spawn();
        link.write(&AUTO_FRAME, Duration::from_secs(1)).await.unwrap();
        let ack = link.read_exact(ACK_FRAME_LEN, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack, GARBLED_ACK.to_vec());
    }

    #[test]
    fn frame_counter_wraps_at_fourteen_bits() {
        let device = MockResistivimeter::default();
        assert_eq!(device.frame(0x4001, 0).count, 1);
    }
}
