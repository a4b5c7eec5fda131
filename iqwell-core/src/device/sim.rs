//! Deterministic simulated acquisition source.
//!
//! Emits a complex tone plus pseudo-noise as interleaved little-endian i16
//! blocks, with capability tables modeled on an E4000-class tuner. Output
//! depends only on the configuration (phase counts samples, noise is a
//! seeded xorshift), so repeated runs produce identical bytes. Used for
//! offline captures and as a stand-in backend in tests.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::convert::BYTES_PER_SAMPLE;
use crate::device::RadioDevice;
use crate::error::{IqwellError, Result};
use crate::gain::GainStage;

/// Rates the simulated tuner reports as known-good, in Hz.
const KNOWN_RATES: [f64; 9] = [
    250e3, 1.0e6, 1.024e6, 1.8e6, 1.92e6, 2.0e6, 2.048e6, 2.4e6, 3.2e6,
];

const FREQ_MIN_HZ: f64 = 52e6;
const FREQ_MAX_HZ: f64 = 2.2e9;

/// IF chain of an E4000-class tuner, in hardware order.
fn if_stage_table() -> Vec<GainStage> {
    vec![
        GainStage::new(-3.0, 6.0, 9.0),
        GainStage::new(0.0, 9.0, 3.0),
        GainStage::new(0.0, 9.0, 3.0),
        GainStage::new(0.0, 2.0, 1.0),
        GainStage::new(3.0, 15.0, 3.0),
        GainStage::new(3.0, 15.0, 3.0),
    ]
}

/// Signal shape and pacing of the simulator.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Tone offset from the (virtual) center frequency, in Hz.
    pub tone_hz: f64,
    /// Tone amplitude in [0, 1].
    pub amplitude: f64,
    /// Peak pseudo-noise amplitude in [0, 1].
    pub noise_level: f64,
    /// Seed for the noise generator.
    pub seed: u32,
    /// Stop after this many blocks; `None` streams until cancelled.
    pub block_limit: Option<u64>,
    /// Sleep one block duration per block so delivery approximates the
    /// configured sample rate. Disable for fast tests.
    pub throttle: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tone_hz: 50_000.0,
            amplitude: 0.7,
            noise_level: 0.01,
            seed: 0x2b5d_91c7,
            block_limit: None,
            throttle: true,
        }
    }
}

struct Tuning {
    sample_rate: f64,
    center_hz: f64,
}

pub struct SimulatedRadio {
    config: SimConfig,
    tuning: Mutex<Tuning>,
    stage_gains: Mutex<Vec<f64>>,
    cancel: AtomicBool,
}

impl SimulatedRadio {
    pub fn new(config: SimConfig) -> Self {
        let stage_gains = if_stage_table().iter().map(|s| s.min_db).collect();
        Self {
            config,
            tuning: Mutex::new(Tuning {
                sample_rate: 500_000.0,
                center_hz: 100e6,
            }),
            stage_gains: Mutex::new(stage_gains),
            cancel: AtomicBool::new(false),
        }
    }

    /// Last value written to each gain element.
    pub fn stage_gains(&self) -> Vec<f64> {
        self.stage_gains.lock().clone()
    }

    /// Sleep `total`, waking early when the stream is cancelled.
    fn throttle_sleep(&self, total: Duration) {
        let mut left = total;
        let step = Duration::from_millis(25);
        while !self.cancel.load(Ordering::Acquire) && !left.is_zero() {
            let nap = left.min(step);
            std::thread::sleep(nap);
            left = left.saturating_sub(nap);
        }
    }
}

impl RadioDevice for SimulatedRadio {
    fn label(&self) -> String {
        "simulated E4000-class tuner".to_string()
    }

    fn sample_rates(&self) -> Vec<f64> {
        KNOWN_RATES.to_vec()
    }

    fn set_sample_rate(&self, rate: f64) -> Result<f64> {
        if !(KNOWN_RATES[0]..=KNOWN_RATES[KNOWN_RATES.len() - 1]).contains(&rate) {
            return Err(IqwellError::Device(format!(
                "sample rate {rate} Hz outside supported span"
            )));
        }
        self.tuning.lock().sample_rate = rate;
        debug!(rate, "simulator sample rate set");
        Ok(rate)
    }

    fn sample_rate(&self) -> f64 {
        self.tuning.lock().sample_rate
    }

    fn frequency_range(&self) -> (f64, f64) {
        (FREQ_MIN_HZ, FREQ_MAX_HZ)
    }

    fn set_center_frequency(&self, hz: f64) -> Result<f64> {
        let clipped = hz.clamp(FREQ_MIN_HZ, FREQ_MAX_HZ);
        self.tuning.lock().center_hz = clipped;
        debug!(requested = hz, actual = clipped, "simulator tuned");
        Ok(clipped)
    }

    fn center_frequency(&self) -> f64 {
        self.tuning.lock().center_hz
    }

    fn gain_stages(&self) -> Vec<GainStage> {
        if_stage_table()
    }

    fn set_stage_gain(&self, stage: usize, db: f64) -> Result<()> {
        let table = if_stage_table();
        let range = table.get(stage).ok_or_else(|| {
            IqwellError::Device(format!("gain stage {stage} does not exist"))
        })?;
        if db < range.min_db - 1e-9 || db > range.max_db + 1e-9 {
            return Err(IqwellError::Device(format!(
                "gain {db} dB outside stage {stage} range [{}, {}]",
                range.min_db, range.max_db
            )));
        }
        self.stage_gains.lock()[stage] = db;
        Ok(())
    }

    fn run_stream(
        &self,
        block_bytes: usize,
        _block_count: usize,
        deliver: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        if block_bytes == 0 || block_bytes % BYTES_PER_SAMPLE != 0 {
            return Err(IqwellError::Device(format!(
                "block size {block_bytes} is not a whole number of IQ pairs"
            )));
        }
        let samples_per_block = block_bytes / BYTES_PER_SAMPLE;
        let mut block = vec![0u8; block_bytes];
        let mut noise = XorShift32::new(self.config.seed);
        let mut sample_clock: u64 = 0;
        let mut blocks: u64 = 0;

        while !self.cancel.load(Ordering::Acquire) {
            if let Some(limit) = self.config.block_limit {
                if blocks >= limit {
                    break;
                }
            }

            let rate = self.tuning.lock().sample_rate;
            for n in 0..samples_per_block {
                let t = (sample_clock + n as u64) as f64 / rate;
                let angle = TAU * self.config.tone_hz * t;
                let i = self.config.amplitude * angle.cos()
                    + self.config.noise_level * noise.next_unit();
                let q = self.config.amplitude * angle.sin()
                    + self.config.noise_level * noise.next_unit();
                let iv = (i * 32_767.0).clamp(-32_768.0, 32_767.0) as i16;
                let qv = (q * 32_767.0).clamp(-32_768.0, 32_767.0) as i16;
                let at = n * BYTES_PER_SAMPLE;
                block[at..at + 2].copy_from_slice(&iv.to_le_bytes());
                block[at + 2..at + 4].copy_from_slice(&qv.to_le_bytes());
            }
            sample_clock += samples_per_block as u64;
            blocks += 1;

            deliver(&block);

            if self.config.throttle {
                self.throttle_sleep(Duration::from_secs_f64(samples_per_block as f64 / rate));
            }
        }

        debug!(blocks, "simulator stream finished");
        Ok(())
    }

    fn cancel_stream(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// Small deterministic noise source; quality is irrelevant, repeatability
/// is not.
struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    fn new(seed: u32) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform-ish value in [-1, 1].
    fn next_unit(&mut self) -> f64 {
        (self.next() as f64 / u32::MAX as f64) * 2.0 - 1.0
    }
}
