//! Shared diagnostics counters for the streaming source.
//!
//! Incremented with relaxed ordering from the acquisition thread and the
//! pulling thread; read via `snapshot()` for status output. Counts are
//! advisory, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SourceDiagnostics {
    /// Callback invocations accepted for inspection (warm-up included).
    pub blocks_in: AtomicU64,
    /// Blocks discarded during device warm-up.
    pub warmup_skipped: AtomicU64,
    /// Blocks rejected for not matching the slot size.
    pub bad_length: AtomicU64,
    /// Publishes that displaced the oldest unread slot, plus publishes
    /// dropped outright because every slot was in use.
    pub overflows: AtomicU64,
    /// Complex samples handed to the caller by completed pulls.
    pub samples_out: AtomicU64,
    /// Acquisition runs that ended with an error status.
    pub stream_errors: AtomicU64,
}

impl SourceDiagnostics {
    pub fn reset(&self) {
        self.blocks_in.store(0, Ordering::Relaxed);
        self.warmup_skipped.store(0, Ordering::Relaxed);
        self.bad_length.store(0, Ordering::Relaxed);
        self.overflows.store(0, Ordering::Relaxed);
        self.samples_out.store(0, Ordering::Relaxed);
        self.stream_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagSnapshot {
        DiagSnapshot {
            blocks_in: self.blocks_in.load(Ordering::Relaxed),
            warmup_skipped: self.warmup_skipped.load(Ordering::Relaxed),
            bad_length: self.bad_length.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            samples_out: self.samples_out.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagSnapshot {
    pub blocks_in: u64,
    pub warmup_skipped: u64,
    pub bad_length: u64,
    pub overflows: u64,
    pub samples_out: u64,
    pub stream_errors: u64,
}
