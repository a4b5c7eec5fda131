//! # iqwell-core
//!
//! Reusable IQ sample streaming engine.
//!
//! ## Architecture
//!
//! ```text
//! RadioDevice::run_stream → BlockIngest → SlotRing → IqSource::pull
//!      (driver thread)        warm-up,     bounded,     exact-length
//!                             length       drop-oldest  Complex32
//!                             checks       overflow     batches
//! ```
//!
//! The device callback never blocks and never allocates. Conversion to
//! `Complex32` happens on the pulling side, one checked-out slot at a time.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod convert;
pub mod device;
pub mod diag;
pub mod error;
pub mod gain;
pub mod source;

// Convenience re-exports for downstream crates
pub use device::replay::ReplayRadio;
pub use device::sim::{SimConfig, SimulatedRadio};
pub use device::{capabilities, DeviceCaps, RadioDevice};
pub use diag::DiagSnapshot;
pub use error::IqwellError;
pub use gain::GainStage;
pub use source::{IqSource, PullStatus, RunState, SourceConfig};

pub use num_complex::Complex32;
