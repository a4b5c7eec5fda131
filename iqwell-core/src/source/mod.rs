//! Streaming source lifecycle.
//!
//! ```text
//! IqSource::start()   → ring allocated, acquisition thread spawned
//!     └─► pull()      → exact-length sample batches for the caller
//!         └─► shutdown() → cancel device, join thread, close ring
//! ```
//!
//! The acquisition thread runs the device's blocking stream call and feeds
//! the ring through `BlockIngest`. The caller pulls on its own schedule;
//! the ring absorbs the rate mismatch, dropping the oldest data when the
//! caller falls too far behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use num_complex::Complex32;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buffering::SlotRing;
use crate::device::RadioDevice;
use crate::diag::{DiagSnapshot, SourceDiagnostics};
use crate::error::{IqwellError, Result};
use crate::gain;

mod ingest;
mod pull;

pub use pull::PullStatus;

use ingest::BlockIngest;
use pull::Puller;

/// USB bulk transfers arrive in multiples of this many bytes; slot sizes
/// must respect it so every driver delivery maps to exactly one slot.
const TRANSFER_UNIT: usize = 512;

/// Lifecycle of a source. Transitions are one-directional:
/// Streaming → Draining → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Streaming,
    Draining,
    Closed,
}

/// Tunables for a streaming source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
    /// Slots in the ring; total buffering is `slot_count * slot_bytes`.
    pub slot_count: usize,
    /// Bytes per slot, a positive multiple of `TRANSFER_UNIT`.
    pub slot_bytes: usize,
    /// Blocks discarded after start while the tuner settles.
    pub warmup_blocks: u32,
    /// Slots that must be buffered before a pull starts reading.
    pub min_fill_slots: usize,
    /// Abort a pull that sees no progress for this long. `None` waits
    /// indefinitely.
    pub pull_timeout: Option<Duration>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            slot_count: 15,
            slot_bytes: 262_144,
            warmup_blocks: 1,
            min_fill_slots: 3,
            pull_timeout: None,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(IqwellError::Config("slot_count must be at least 1".into()));
        }
        if self.slot_bytes == 0 || self.slot_bytes % TRANSFER_UNIT != 0 {
            return Err(IqwellError::Config(format!(
                "slot_bytes must be a positive multiple of {TRANSFER_UNIT}, got {}",
                self.slot_bytes
            )));
        }
        if self.min_fill_slots == 0 || self.min_fill_slots > self.slot_count {
            return Err(IqwellError::Config(format!(
                "min_fill_slots must be within 1..={}, got {}",
                self.slot_count, self.min_fill_slots
            )));
        }
        Ok(())
    }
}

/// A running IQ stream bound to one device.
///
/// Pulls are `&mut self` and therefore single-consumer by construction.
/// Dropping the source without calling [`shutdown`](IqSource::shutdown)
/// still tears the stream down in order.
pub struct IqSource {
    device: Arc<dyn RadioDevice>,
    config: SourceConfig,
    ring: Arc<SlotRing>,
    running: Arc<AtomicBool>,
    state: Mutex<RunState>,
    diag: Arc<SourceDiagnostics>,
    puller: Puller,
    acquisition: Option<JoinHandle<()>>,
}

impl IqSource {
    /// Validate `config`, spawn the acquisition thread, and begin
    /// streaming from `device`.
    ///
    /// Device faults after this point do not surface as errors here; they
    /// end the stream, which pulls observe as end-of-stream, and are
    /// counted in the diagnostics.
    pub fn start(device: Arc<dyn RadioDevice>, config: SourceConfig) -> Result<Self> {
        config.validate()?;

        let ring = Arc::new(SlotRing::new(config.slot_count, config.slot_bytes));
        let running = Arc::new(AtomicBool::new(true));
        let diag = Arc::new(SourceDiagnostics::default());

        let thread_ring = Arc::clone(&ring);
        let thread_running = Arc::clone(&running);
        let thread_diag = Arc::clone(&diag);
        let thread_device = Arc::clone(&device);
        let slot_bytes = config.slot_bytes;
        let slot_count = config.slot_count;
        let warmup = config.warmup_blocks;

        let acquisition = std::thread::Builder::new()
            .name("iqwell-acquire".into())
            .spawn(move || {
                let mut ingest = BlockIngest::new(
                    Arc::clone(&thread_ring),
                    Arc::clone(&thread_running),
                    warmup,
                    Arc::clone(&thread_diag),
                );
                let mut deliver = |block: &[u8]| ingest.absorb(block);
                if let Err(e) = thread_device.run_stream(slot_bytes, slot_count, &mut deliver) {
                    thread_diag.stream_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "device stream ended with an error");
                }
                // However the stream ended, a blocked pull must wake and
                // see end-of-stream instead of sleeping forever.
                thread_running.store(false, Ordering::SeqCst);
                thread_ring.close();
            })?;

        info!(
            device = %device.label(),
            slot_count,
            slot_bytes,
            warmup_blocks = warmup,
            "acquisition started"
        );

        let puller = Puller::new(
            Arc::clone(&ring),
            Arc::clone(&diag),
            config.min_fill_slots,
            config.pull_timeout,
        );

        Ok(Self {
            device,
            config,
            ring,
            running,
            state: Mutex::new(RunState::Streaming),
            diag,
            puller,
            acquisition: Some(acquisition),
        })
    }

    /// Next `count` consecutive samples; `Ok(None)` is end-of-stream.
    pub fn pull(&mut self, count: usize) -> Result<Option<Vec<Complex32>>> {
        self.puller.pull(count)
    }

    /// Zero-allocation pull filling `out` completely or reporting
    /// [`PullStatus::EndOfStream`].
    pub fn pull_into(&mut self, out: &mut [Complex32]) -> Result<PullStatus> {
        self.puller.pull_into(out)
    }

    /// Spread `target_db` across the device's gain elements and apply the
    /// result stage by stage. Returns the sum actually applied, which can
    /// differ from the target by quantization residue.
    pub fn set_aggregate_gain(&self, target_db: f64) -> Result<f64> {
        let stages = self.device.gain_stages();
        let allocation = gain::allocate(target_db, &stages);
        for (index, db) in allocation.iter().enumerate() {
            self.device.set_stage_gain(index, *db)?;
        }
        let applied: f64 = allocation.iter().sum();
        debug!(target = target_db, applied, "aggregate gain distributed");
        Ok(applied)
    }

    pub fn set_sample_rate(&self, rate: f64) -> Result<f64> {
        self.device.set_sample_rate(rate)
    }

    pub fn sample_rate(&self) -> f64 {
        self.device.sample_rate()
    }

    pub fn set_center_frequency(&self, hz: f64) -> Result<f64> {
        self.device.set_center_frequency(hz)
    }

    pub fn center_frequency(&self) -> f64 {
        self.device.center_frequency()
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Snapshot of the stream counters.
    pub fn diagnostics(&self) -> DiagSnapshot {
        self.diag.snapshot()
    }

    /// Stop the stream and release everything in dependency order.
    ///
    /// Idempotent; a second call returns immediately.
    pub fn shutdown(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == RunState::Closed {
                return Ok(());
            }
            *state = RunState::Draining;
        }
        info!("shutdown requested");

        // ── 1. Stop intake and ask the driver to return from its blocking call ──
        self.running.store(false, Ordering::SeqCst);
        self.device.cancel_stream();

        // ── 2. Join before touching anything the thread might still use ──
        let join_result = match self.acquisition.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        };

        // ── 3. Wake any pull still blocked on the ring ──
        self.ring.close();
        *self.state.lock() = RunState::Closed;

        let snap = self.diag.snapshot();
        info!(
            blocks_in = snap.blocks_in,
            samples_out = snap.samples_out,
            overflows = snap.overflows,
            bad_length = snap.bad_length,
            stream_errors = snap.stream_errors,
            "acquisition stopped"
        );

        if join_result.is_err() {
            return Err(IqwellError::Other(anyhow::anyhow!(
                "acquisition thread panicked"
            )));
        }
        Ok(())
    }
}

impl Drop for IqSource {
    fn drop(&mut self) {
        if *self.state.lock() != RunState::Closed {
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "shutdown during drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gain::GainStage;
    use serde_json::json;

    /// Device that produces nothing and parks in `run_stream` until
    /// cancelled; gain writes are recorded for inspection.
    struct IdleRadio {
        applied: Mutex<Vec<(usize, f64)>>,
        cancel: AtomicBool,
    }

    impl IdleRadio {
        fn new() -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                cancel: AtomicBool::new(false),
            }
        }
    }

    impl RadioDevice for IdleRadio {
        fn label(&self) -> String {
            "idle fake".to_string()
        }

        fn sample_rates(&self) -> Vec<f64> {
            vec![1e6]
        }

        fn set_sample_rate(&self, rate: f64) -> Result<f64> {
            Ok(rate)
        }

        fn sample_rate(&self) -> f64 {
            1e6
        }

        fn frequency_range(&self) -> (f64, f64) {
            (0.0, 1e9)
        }

        fn set_center_frequency(&self, hz: f64) -> Result<f64> {
            Ok(hz)
        }

        fn center_frequency(&self) -> f64 {
            0.0
        }

        fn gain_stages(&self) -> Vec<GainStage> {
            vec![
                GainStage::new(-3.0, 6.0, 9.0),
                GainStage::new(0.0, 9.0, 3.0),
                GainStage::new(0.0, 9.0, 3.0),
                GainStage::new(0.0, 2.0, 1.0),
                GainStage::new(3.0, 15.0, 3.0),
                GainStage::new(3.0, 15.0, 3.0),
            ]
        }

        fn set_stage_gain(&self, stage: usize, db: f64) -> Result<()> {
            self.applied.lock().push((stage, db));
            Ok(())
        }

        fn run_stream(
            &self,
            _block_bytes: usize,
            _block_count: usize,
            _deliver: &mut dyn FnMut(&[u8]),
        ) -> Result<()> {
            while !self.cancel.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }

        fn cancel_stream(&self) {
            self.cancel.store(true, Ordering::Release);
        }
    }

    fn small_config() -> SourceConfig {
        SourceConfig {
            slot_count: 4,
            slot_bytes: 512,
            warmup_blocks: 0,
            min_fill_slots: 1,
            pull_timeout: None,
        }
    }

    #[test]
    fn config_validation_rejects_bad_shapes() {
        let good = SourceConfig::default();
        assert!(good.validate().is_ok());

        let no_slots = SourceConfig {
            slot_count: 0,
            ..SourceConfig::default()
        };
        assert!(no_slots.validate().is_err());

        let ragged = SourceConfig {
            slot_bytes: 1000,
            ..SourceConfig::default()
        };
        assert!(ragged.validate().is_err());

        let zero_fill = SourceConfig {
            min_fill_slots: 0,
            ..SourceConfig::default()
        };
        assert!(zero_fill.validate().is_err());

        let fill_past_capacity = SourceConfig {
            min_fill_slots: good.slot_count + 1,
            ..SourceConfig::default()
        };
        assert!(fill_past_capacity.validate().is_err());
    }

    #[test]
    fn config_deserializes_camel_case_with_defaults() {
        let config: SourceConfig =
            serde_json::from_value(json!({ "slotCount": 8, "minFillSlots": 2 }))
                .expect("config json");
        assert_eq!(config.slot_count, 8);
        assert_eq!(config.min_fill_slots, 2);
        assert_eq!(config.slot_bytes, 262_144);
        assert_eq!(config.warmup_blocks, 1);
        assert!(config.pull_timeout.is_none());
    }

    #[test]
    fn run_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(RunState::Streaming).expect("json"),
            json!("streaming")
        );
        assert_eq!(
            serde_json::to_value(RunState::Closed).expect("json"),
            json!("closed")
        );
    }

    #[test]
    fn aggregate_gain_is_applied_stage_by_stage() {
        let device = Arc::new(IdleRadio::new());
        let mut source =
            IqSource::start(Arc::clone(&device) as Arc<dyn RadioDevice>, small_config())
                .expect("start");

        let applied = source.set_aggregate_gain(48.0).expect("gain");
        assert_eq!(applied, 47.0);
        assert_eq!(
            &*device.applied.lock(),
            &vec![
                (0, -3.0),
                (1, 9.0),
                (2, 9.0),
                (3, 2.0),
                (4, 15.0),
                (5, 15.0)
            ]
        );

        source.shutdown().expect("shutdown");
    }

    #[test]
    fn shutdown_joins_and_is_idempotent() {
        let device = Arc::new(IdleRadio::new());
        let mut source =
            IqSource::start(Arc::clone(&device) as Arc<dyn RadioDevice>, small_config())
                .expect("start");
        assert_eq!(source.state(), RunState::Streaming);

        source.shutdown().expect("shutdown");
        assert_eq!(source.state(), RunState::Closed);
        source.shutdown().expect("second shutdown");

        // Drained and closed: pulls report end-of-stream, never block.
        assert!(source.pull(4).expect("pull").is_none());
    }

    #[test]
    fn drop_without_shutdown_tears_down_cleanly() {
        let device = Arc::new(IdleRadio::new());
        let source = IqSource::start(device, small_config()).expect("start");
        drop(source);
    }
}
