//! Acquisition parameters
//!
//! [`AcquisitionParams`] is the raw input (CLI flags or the `[acquisition]`
//! settings section). [`DeviceConfig`] is its validated, immutable form: building
//! one runs every range check and every value encoder, so a `DeviceConfig` always
//! encodes to a configuration frame.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::hardware::constants::{CHANNELS_MAX, IX_MAX, TX_MAX};
use crate::hardware::frame_codec::{measure_frame_len, CodedParams};
use crate::hardware::value_codec::ValueCodec;

/// Acquisition parameters as entered by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    /// Injected signal amplitude, V
    #[serde(default = "default_voltage")]
    pub voltage: f64,
    /// Injected signal frequency
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    /// External impulsions required per measurement
    #[serde(default = "default_count")]
    pub impuls_nb: u32,
    /// Channels decoded per measure frame
    #[serde(default = "default_count")]
    pub channels_nb: u32,
    /// Values transmitted per second, 0 for manual requests
    #[serde(default = "default_count")]
    pub integration_nb: u32,
}

fn default_voltage() -> f64 {
    16.55
}

fn default_frequency() -> f64 {
    976.5625
}

fn default_count() -> u32 {
    1
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            voltage: default_voltage(),
            frequency: default_frequency(),
            impuls_nb: default_count(),
            channels_nb: default_count(),
            integration_nb: default_count(),
        }
    }
}

impl AcquisitionParams {
    /// Validate into a [`DeviceConfig`].
    pub fn validate(&self, codec: &ValueCodec) -> AppResult<DeviceConfig> {
        DeviceConfig::new(self, codec)
    }
}

/// Validated acquisition parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    voltage: f64,
    frequency: f64,
    impuls_nb: u8,
    channels_nb: u8,
    integration_nb: u16,
    coded: CodedParams,
}

impl DeviceConfig {
    /// Run all range checks and encoders on `params`.
    ///
    /// # Errors
    /// `InvalidParameter` naming the first offending field.
    pub fn new(params: &AcquisitionParams, codec: &ValueCodec) -> AppResult<Self> {
        debug!(
            voltage = params.voltage,
            frequency = params.frequency,
            impuls_nb = params.impuls_nb,
            channels_nb = params.channels_nb,
            integration_nb = params.integration_nb,
            "Checking acquisition parameters"
        );

        let ux = codec.encode_voltage(params.voltage)?;
        let fx = codec.encode_frequency(params.frequency)?;
        let impuls_nb = codec.encode_count("impuls_nb", params.impuls_nb, 1..=IX_MAX)?;
        let channels_nb = codec.encode_count("channels_nb", params.channels_nb, 1..=CHANNELS_MAX)?;
        let integration_nb = codec.encode_count("integration_nb", params.integration_nb, 0..=TX_MAX)?;

        if u32::from(channels_nb) > IX_MAX {
            warn!(
                channels_nb,
                sent = channels_nb & 0x7F,
                "Channel count does not fit the 7-bit frame field and is truncated on the wire"
            );
        }

        let coded = CodedParams {
            ux,
            fx,
            impuls: impuls_nb as u8,
            channels: (channels_nb & 0x7F) as u8,
            integration: integration_nb,
        };

        Ok(Self {
            voltage: params.voltage,
            frequency: params.frequency,
            impuls_nb: impuls_nb as u8,
            channels_nb: channels_nb as u8,
            integration_nb,
            coded,
        })
    }

    /// Injection voltage, V
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Injection frequency
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// External impulsions per measurement
    pub fn impuls_nb(&self) -> u8 {
        self.impuls_nb
    }

    /// Channels per measure frame
    pub fn channels_nb(&self) -> u8 {
        self.channels_nb
    }

    /// Integration constant
    pub fn integration_nb(&self) -> u16 {
        self.integration_nb
    }

    /// `integration_nb == 0`: each sample is requested explicitly.
    pub fn is_manual(&self) -> bool {
        self.integration_nb == 0
    }

    /// Length in bytes of a measure frame for this configuration.
    pub fn measure_frame_len(&self) -> usize {
        measure_frame_len(usize::from(self.channels_nb))
    }

    /// Device codes derived from the parameters.
    pub fn coded(&self) -> &CodedParams {
        &self.coded
    }
}
