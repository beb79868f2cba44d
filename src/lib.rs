//! # Resistes DAQ Core Library
//!
//! Protocol layer and acquisition tooling for an electro-static
//! resistivimeter. The device is configured with a 10-byte binary frame,
//! echoes it back with a status byte, then streams measure frames (or answers
//! one request at a time in manual mode). This crate encodes and checks those
//! frames, converts raw codes into physical values and drives the whole
//! exchange as an async state machine.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: the [`ByteChannel`](adapters::ByteChannel) trait and its
//!   serial, TCP and in-memory implementations, opened from a URL.
//! - **`config`**: figment-based [`Settings`](config::Settings) from TOML and
//!   `RESISTES_*` environment variables.
//! - **`data`**: CSV output of measurement records.
//! - **`error`**: the [`DaqError`](error::DaqError) enum shared by every module.
//! - **`hardware`**: value codec, frame codec, acquisition parameters and a
//!   simulated resistivimeter.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`measurement`**: physical records and the sinks consuming them.
//! - **`session`**: the [`AcquisitionSession`](session::AcquisitionSession)
//!   state machine.
//! - **`trigger`**: measurement request sources for manual mode.
//! - **`validation`**: small range and format checks.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod session;
pub mod trigger;
pub mod validation;

pub use error::{AppResult, DaqError};
pub use session::{AcquisitionSession, SessionState};
