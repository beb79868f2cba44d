//! Physically scaled measurement records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hardware::frame_codec::MeasureFrame;
use crate::hardware::value_codec::{magnitude, Resistivity, ValueCodec};

/// Decoded values of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRecord {
    /// Phase potential, mV
    pub phase_potential_mv: f64,
    /// Quadrature potential, mV
    pub quad_potential_mv: f64,
    /// Apparent resistivity, kOhm.m; `None` when the current is zero
    pub resistivity: Option<Resistivity>,
}

/// One decoded sample, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureRecord {
    /// Host reception time
    pub timestamp: DateTime<Utc>,
    /// Device sequence counter
    pub count: u16,
    /// Receiver battery, V
    pub rec_battery_v: f64,
    /// Emitter battery, V
    pub em_battery_v: f64,
    /// Phase current, mA
    pub phase_current_ma: f64,
    /// Quadrature current, mA
    pub quad_current_ma: f64,
    /// Per channel values
    pub channels: Vec<ChannelRecord>,
}

impl MeasureRecord {
    /// Scale a raw frame received at `timestamp`.
    pub fn from_frame(frame: &MeasureFrame, codec: &ValueCodec, timestamp: DateTime<Utc>) -> Self {
        let phase_current_ma = codec.decode_current(frame.phase_current);
        let quad_current_ma = codec.decode_current(frame.quad_current);

        let channels = frame
            .channels
            .iter()
            .map(|ch| {
                let phase_potential_mv = codec.decode_potential(ch.phase);
                let quad_potential_mv = codec.decode_potential(ch.quad);
                ChannelRecord {
                    phase_potential_mv,
                    quad_potential_mv,
                    resistivity: codec.resistivity(
                        phase_current_ma,
                        quad_current_ma,
                        phase_potential_mv,
                        quad_potential_mv,
                    ),
                }
            })
            .collect();

        Self {
            timestamp,
            count: frame.count,
            rec_battery_v: codec.decode_battery(frame.rec_battery),
            em_battery_v: codec.decode_battery(frame.em_battery),
            phase_current_ma,
            quad_current_ma,
            channels,
        }
    }

    /// Current modulus, mA
    pub fn current_magnitude(&self) -> f64 {
        magnitude(self.phase_current_ma, self.quad_current_ma)
    }
}
