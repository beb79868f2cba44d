//! Resistivimeter protocol
//!
//! Pure codecs for the device frames plus a simulated device.
//!
//! - [`constants`]: device limits and conversion factors
//! - [`value_codec`]: physical units <-> coded values
//! - [`params`]: operator parameters and their validated form
//! - [`frame_codec`]: configuration, acknowledgement and measure frames
//! - [`mock`]: in-memory resistivimeter

pub mod constants;
pub mod frame_codec;
pub mod mock;
pub mod params;
pub mod value_codec;

pub use constants::DeviceConstants;
pub use frame_codec::{AckStatus, ConfigFrame, MeasureFrame};
pub use params::{AcquisitionParams, DeviceConfig};
pub use value_codec::{Resistivity, ValueCodec};
