//! Value codec
//!
//! Conversions between physical units and the coded values carried by the
//! resistivimeter frames. Encoders validate their input against the injected
//! [`DeviceConstants`] and fail with [`DaqError::InvalidParameter`]; decoders are
//! total over their code range.
//!
//! | quantity | formula |
//! |---|---|
//! | voltage code `Ux` | `round(256 * (900 / V - 0.08 - 4.5) / 50)` |
//! | frequency code `Fx` | `round(F * 2^28 / 500000)` |
//! | potential, mV | `code * 5000 / 2^28` |
//! | current, mA | `code * 5e6 / (RI * 2^28)` |
//! | battery, V | `full_scale * code / 16383` |
//!
//! Rounding is half-to-even.

use std::ops::RangeInclusive;

use num_complex::Complex64;
use serde::Serialize;

use crate::error::{AppResult, DaqError};
use crate::hardware::constants::{DeviceConstants, CODE14_MAX, FX_MAX, UX_MAX};
use crate::validation::check_range;

const TWO_POW_28: f64 = (1u64 << 28) as f64;

/// Below this current magnitude (mA) resistivity is undefined.
pub const CURRENT_EPSILON_MA: f64 = 1e-9;

/// Phase and quadrature parts of an apparent resistivity, kOhm.m
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resistivity {
    /// In-phase component
    pub phase: f64,
    /// Quadrature component
    pub quad: f64,
}

impl Resistivity {
    /// Modulus of the complex resistivity.
    pub fn magnitude(&self) -> f64 {
        magnitude(self.phase, self.quad)
    }
}

/// Unit conversions for one device constants table.
#[derive(Debug, Clone, Default)]
pub struct ValueCodec {
    constants: DeviceConstants,
}

impl ValueCodec {
    /// Create a codec bound to `constants`.
    pub fn new(constants: DeviceConstants) -> Self {
        Self { constants }
    }

    /// The injected constants table.
    pub fn constants(&self) -> &DeviceConstants {
        &self.constants
    }

    /// Encode the injection voltage (V) into the 8-bit `Ux` code.
    ///
    /// # Errors
    /// `InvalidParameter` when `v` is outside `[injvolt_min, injvolt_max]` or its
    /// code does not fit 8 bits.
    pub fn encode_voltage(&self, v: f64) -> AppResult<u8> {
        check_range(
            "voltage",
            v,
            self.constants.injvolt_min..=self.constants.injvolt_max,
        )?;

        let ux = (256.0 * ((900.0 / v) - 0.08 - 4.5) / 50.0).round_ties_even();
        if !(0.0..=UX_MAX as f64).contains(&ux) {
            return Err(DaqError::invalid(
                "voltage",
                format!("{} V converts to code {} outside 0..={}", v, ux, UX_MAX),
            ));
        }
        Ok(ux as u8)
    }

    /// Encode the injection frequency into the 25-bit `Fx` code.
    ///
    /// # Errors
    /// `InvalidParameter` when `f` is outside `[injfreq_min, injfreq_max]` or its
    /// code exceeds [`FX_MAX`].
    pub fn encode_frequency(&self, f: f64) -> AppResult<u32> {
        check_range(
            "frequency",
            f,
            self.constants.injfreq_min..=self.constants.injfreq_max,
        )?;

        let fx = (f * TWO_POW_28 / 500_000.0).round_ties_even();
        if !(0.0..=FX_MAX as f64).contains(&fx) {
            return Err(DaqError::invalid(
                "frequency",
                format!("{} converts to code {} above {}", f, fx, FX_MAX),
            ));
        }
        Ok(fx as u32)
    }

    /// Validate a count field against its inclusive bounds.
    pub fn encode_count(
        &self,
        field: &'static str,
        n: u32,
        range: RangeInclusive<u32>,
    ) -> AppResult<u16> {
        let n = check_range(field, n, range)?;
        u16::try_from(n).map_err(|_| DaqError::invalid(field, format!("{} does not fit 16 bits", n)))
    }

    /// Potential in mV from a signed 28-bit code.
    pub fn decode_potential(&self, code: i32) -> f64 {
        f64::from(code) * 5000.0 / TWO_POW_28
    }

    /// Current in mA from a signed 28-bit code.
    pub fn decode_current(&self, code: i32) -> f64 {
        f64::from(code) * 5_000_000.0 / (self.constants.ri * TWO_POW_28)
    }

    /// Battery voltage in V from a 14-bit code.
    pub fn decode_battery(&self, code: u16) -> f64 {
        self.constants.battery_full_scale * f64::from(code) / f64::from(CODE14_MAX)
    }

    /// Apparent resistivity from the current and potential phasors.
    ///
    /// Returns `None` when the current magnitude is below [`CURRENT_EPSILON_MA`].
    pub fn resistivity(
        &self,
        phase_i: f64,
        quad_i: f64,
        phase_v: f64,
        quad_v: f64,
    ) -> Option<Resistivity> {
        let current = Complex64::new(phase_i, quad_i);
        let norm = current.norm();
        if norm.is_nan() || norm < CURRENT_EPSILON_MA {
            return None;
        }
        let potential = Complex64::new(phase_v, quad_v);
        let rho = potential / current * self.constants.resistivity_scale;
        Some(Resistivity {
            phase: rho.re,
            quad: rho.im,
        })
    }
}

/// Modulus of a phase/quadrature pair.
pub fn magnitude(phase: f64, quad: f64) -> f64 {
    phase.hypot(quad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ValueCodec {
        ValueCodec::new(DeviceConstants::default())
    }

    #[test]
    fn voltage_codes_at_trace_and_bounds() {
        let c = codec();
        assert_eq!(c.encode_voltage(16.85).unwrap(), 250);
        assert_eq!(c.encode_voltage(16.55).unwrap(), 255);
        assert_eq!(c.encode_voltage(196.51).unwrap(), 0);
    }

    #[test]
    fn voltage_out_of_range_is_rejected() {
        let c = codec();
        for v in [16.54, 196.52, 0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = c.encode_voltage(v).unwrap_err();
            assert!(
                matches!(err, DaqError::InvalidParameter { field: "voltage", .. }),
                "{v}: {err}"
            );
        }
    }

    #[test]
    fn frequency_codes() {
        let c = codec();
        assert_eq!(c.encode_frequency(976.5625).unwrap(), 1 << 19);
        assert_eq!(c.encode_frequency(0.0).unwrap(), 0);
        assert!(c.encode_frequency(62499.0).unwrap() <= FX_MAX);
        assert!(c.encode_frequency(62500.0).is_err());
        assert!(c.encode_frequency(-1.0).is_err());
    }

    #[test]
    fn count_bounds() {
        let c = codec();
        assert_eq!(c.encode_count("impuls_nb", 1, 1..=127).unwrap(), 1);
        assert!(c.encode_count("impuls_nb", 0, 1..=127).is_err());
        assert_eq!(c.encode_count("integration_nb", 0, 0..=16383).unwrap(), 0);
        assert!(c.encode_count("integration_nb", 16384, 0..=16383).is_err());
    }

    #[test]
    fn decoders_follow_documented_scales() {
        let c = codec();
        assert!((c.decode_potential(1 << 20) - 5000.0 / 256.0).abs() < 1e-12);
        assert!((c.decode_potential(-(1 << 27)) + 2500.0).abs() < 1e-9);
        let expected_ma = 5_000_000.0 / (110.0 * 256.0);
        assert!((c.decode_current(1 << 20) - expected_ma).abs() < 1e-9);
        assert!((c.decode_battery(16383) - 18.3).abs() < 1e-12);
        assert_eq!(c.decode_battery(0), 0.0);
    }

    #[test]
    fn resistivity_is_scaled_complex_division() {
        let c = codec();
        // (3 + 4j) / (1 + 2j) = 2.2 - 0.4j
        let r = c.resistivity(1.0, 2.0, 3.0, 4.0).unwrap();
        assert!((r.phase - 2200.0).abs() < 1e-9);
        assert!((r.quad + 400.0).abs() < 1e-9);
        assert!((r.magnitude() - (2200.0f64.powi(2) + 400.0f64.powi(2)).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn resistivity_undefined_without_current() {
        let c = codec();
        assert_eq!(c.resistivity(0.0, 0.0, 1.0, 1.0), None);
        assert_eq!(c.resistivity(f64::NAN, 0.0, 1.0, 1.0), None);
    }
}
