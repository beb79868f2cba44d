//! Device constants table
//!
//! Physical limits and conversion factors of the resistivimeter. The table is
//! immutable once built and injected into [`ValueCodec`](super::value_codec::ValueCodec);
//! the defaults match the production board and can be overridden from the
//! `[device]` section of the settings file for bench rigs.

use serde::{Deserialize, Serialize};

/// Largest voltage code accepted by the device (8 bits).
pub const UX_MAX: u32 = 255;
/// Largest frequency code accepted by the device (25 bits).
pub const FX_MAX: u32 = (1 << 25) - 1;
/// Largest external impulsion count.
pub const IX_MAX: u32 = 127;
/// Largest channel count.
pub const CHANNELS_MAX: u32 = 255;
/// Largest integration constant (14 bits).
pub const TX_MAX: u32 = 16383;
/// Full scale of 14-bit codes (batteries, counter).
pub const CODE14_MAX: u32 = 16383;

/// Conversion constants of the resistivimeter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConstants {
    /// Lowest injection voltage, V
    #[serde(default = "default_injvolt_min")]
    pub injvolt_min: f64,
    /// Highest injection voltage, V
    #[serde(default = "default_injvolt_max")]
    pub injvolt_max: f64,
    /// Lowest injection frequency
    #[serde(default = "default_injfreq_min")]
    pub injfreq_min: f64,
    /// Highest injection frequency
    #[serde(default = "default_injfreq_max")]
    pub injfreq_max: f64,
    /// Current sense resistor factor
    #[serde(default = "default_ri")]
    pub ri: f64,
    /// Geometric factor applied to V/I to obtain resistivity
    #[serde(default = "default_resistivity_scale")]
    pub resistivity_scale: f64,
    /// Battery voltage read at code [`CODE14_MAX`], V
    #[serde(default = "default_battery_full_scale")]
    pub battery_full_scale: f64,
}

fn default_injvolt_min() -> f64 {
    16.55
}

fn default_injvolt_max() -> f64 {
    196.51
}

fn default_injfreq_min() -> f64 {
    0.0
}

fn default_injfreq_max() -> f64 {
    62499.0
}

fn default_ri() -> f64 {
    110.0
}

fn default_resistivity_scale() -> f64 {
    1000.0
}

fn default_battery_full_scale() -> f64 {
    18.3
}

impl Default for DeviceConstants {
    fn default() -> Self {
        Self {
            injvolt_min: default_injvolt_min(),
            injvolt_max: default_injvolt_max(),
            injfreq_min: default_injfreq_min(),
            injfreq_max: default_injfreq_max(),
            ri: default_ri(),
            resistivity_scale: default_resistivity_scale(),
            battery_full_scale: default_battery_full_scale(),
        }
    }
}

impl DeviceConstants {
    /// Validate internal consistency of an overridden table.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.injvolt_min > 0.0 && self.injvolt_min < self.injvolt_max) {
            return Err(format!(
                "Invalid injection voltage range [{}, {}]",
                self.injvolt_min, self.injvolt_max
            ));
        }
        if !(self.injfreq_min >= 0.0 && self.injfreq_min <= self.injfreq_max) {
            return Err(format!(
                "Invalid injection frequency range [{}, {}]",
                self.injfreq_min, self.injfreq_max
            ));
        }
        if !self.ri.is_finite() || self.ri <= 0.0 {
            return Err(format!("Invalid ri {}. Must be positive", self.ri));
        }
        if !self.resistivity_scale.is_finite() || self.resistivity_scale == 0.0 {
            return Err(format!(
                "Invalid resistivity_scale {}",
                self.resistivity_scale
            ));
        }
        if !self.battery_full_scale.is_finite() || self.battery_full_scale <= 0.0 {
            return Err(format!(
                "Invalid battery_full_scale {}",
                self.battery_full_scale
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_board() {
        let c = DeviceConstants::default();
        assert_eq!(c.injvolt_min, 16.55);
        assert_eq!(c.injvolt_max, 196.51);
        assert_eq!(c.injfreq_max, 62499.0);
        assert_eq!(c.ri, 110.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let c: DeviceConstants = toml::from_str("ri = 220.0").unwrap();
        assert_eq!(c.ri, 220.0);
        assert_eq!(c.injvolt_min, 16.55);
    }

    #[test]
    fn inverted_voltage_range_is_rejected() {
        let c = DeviceConstants {
            injvolt_min: 200.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn code_limits() {
        assert_eq!(FX_MAX, 33_554_431);
        assert_eq!(TX_MAX, CODE14_MAX);
    }
}
