//! Acquisition device abstraction.
//!
//! `RadioDevice` decouples the streaming source from any specific backend
//! (simulator, capture-file replay, hardware drivers). Implementations own
//! their tuning state behind interior mutability so a shared
//! `Arc<dyn RadioDevice>` can be tuned from the caller's thread while
//! `run_stream` blocks on the acquisition thread.

pub mod replay;
pub mod sim;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gain::{self, GainStage};

/// Contract for acquisition backends.
///
/// `run_stream` is the blocking asynchronous-read entry point: it delivers
/// byte blocks of exactly `block_bytes` to `deliver` on the calling thread
/// and returns only after an error or a `cancel_stream` call. Implementors
/// must tolerate `cancel_stream` arriving from another thread at any time,
/// including before `run_stream` starts.
pub trait RadioDevice: Send + Sync {
    /// Short human-readable identifier for logs and capability reports.
    fn label(&self) -> String;

    /// Sample rates the device is known to support, in Hz.
    fn sample_rates(&self) -> Vec<f64>;

    /// Set the sample rate. Returns the rate actually in effect.
    fn set_sample_rate(&self, rate: f64) -> Result<f64>;

    /// Sample rate currently in effect, in Hz.
    fn sample_rate(&self) -> f64;

    /// Tunable range as `(low, high)` in Hz.
    fn frequency_range(&self) -> (f64, f64);

    /// Tune the center frequency. Returns the frequency actually in effect.
    fn set_center_frequency(&self, hz: f64) -> Result<f64>;

    /// Center frequency currently in effect, in Hz.
    fn center_frequency(&self) -> f64;

    /// The device's quantized gain elements, in hardware order.
    fn gain_stages(&self) -> Vec<GainStage>;

    /// Set one gain element to a quantized value within its range.
    fn set_stage_gain(&self, stage: usize, db: f64) -> Result<()>;

    /// Deliver blocks until cancelled or failed. `block_count` is a hint for
    /// backends that pre-allocate transfer buffers.
    fn run_stream(
        &self,
        block_bytes: usize,
        block_count: usize,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<()>;

    /// Ask a blocking `run_stream` call to return. Must not block.
    fn cancel_stream(&self);
}

/// Capability summary for one device, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCaps {
    pub label: String,
    pub frequency_min_hz: f64,
    pub frequency_max_hz: f64,
    pub sample_rates: Vec<f64>,
    pub gain_stages: Vec<GainStage>,
    /// Reachable aggregate gain span: sum of stage minimums and maximums.
    pub aggregate_gain_min_db: f64,
    pub aggregate_gain_max_db: f64,
}

/// Assemble the capability report for any backend.
pub fn capabilities(device: &dyn RadioDevice) -> DeviceCaps {
    let stages = device.gain_stages();
    let (freq_min, freq_max) = device.frequency_range();
    let (gain_min, gain_max) = gain::aggregate_range(&stages);
    DeviceCaps {
        label: device.label(),
        frequency_min_hz: freq_min,
        frequency_max_hz: freq_max,
        sample_rates: device.sample_rates(),
        gain_stages: stages,
        aggregate_gain_min_db: gain_min,
        aggregate_gain_max_db: gain_max,
    }
}

#[cfg(test)]
mod tests {
    use super::sim::{SimConfig, SimulatedRadio};
    use super::*;

    #[test]
    fn capability_report_serializes_camel_case() {
        let device = SimulatedRadio::new(SimConfig::default());
        let caps = capabilities(&device);
        let json = serde_json::to_value(&caps).expect("serialize capabilities");

        assert_eq!(json["label"], caps.label);
        assert_eq!(json["frequencyMinHz"], 52e6);
        assert_eq!(json["frequencyMaxHz"], 2.2e9);
        assert_eq!(json["aggregateGainMinDb"], 3.0);
        assert_eq!(json["aggregateGainMaxDb"], 56.0);
        assert_eq!(
            json["gainStages"].as_array().map(Vec::len),
            Some(caps.gain_stages.len())
        );

        let round_trip: DeviceCaps =
            serde_json::from_value(json).expect("deserialize capabilities");
        assert_eq!(round_trip.sample_rates, caps.sample_rates);
    }
}
