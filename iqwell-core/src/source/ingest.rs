//! Producer side of the stream: block intake on the acquisition thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffering::{PublishOutcome, SlotRing};
use crate::diag::SourceDiagnostics;

/// Accepts raw blocks from the device callback and publishes them into the
/// ring. Lives on the acquisition thread; everything it does must return
/// quickly so the driver never starves.
pub(crate) struct BlockIngest {
    ring: Arc<SlotRing>,
    running: Arc<AtomicBool>,
    warmup_left: u32,
    diag: Arc<SourceDiagnostics>,
}

impl BlockIngest {
    pub(crate) fn new(
        ring: Arc<SlotRing>,
        running: Arc<AtomicBool>,
        warmup_blocks: u32,
        diag: Arc<SourceDiagnostics>,
    ) -> Self {
        Self {
            ring,
            running,
            warmup_left: warmup_blocks,
            diag,
        }
    }

    /// Handle one delivered block. Never blocks: a full ring costs the
    /// oldest unread block, not producer time.
    pub(crate) fn absorb(&mut self, block: &[u8]) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        self.diag.blocks_in.fetch_add(1, Ordering::Relaxed);

        // The first deliveries after tuning carry transients; drop them.
        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            self.diag.warmup_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(left = self.warmup_left, "skipped warm-up block");
            return;
        }

        if block.len() != self.ring.slot_bytes() {
            self.diag.bad_length.fetch_add(1, Ordering::Relaxed);
            warn!(
                got = block.len(),
                want = self.ring.slot_bytes(),
                "dropped block of unexpected length"
            );
            return;
        }

        match self.ring.publish_with(|slot| slot.copy_from_slice(block)) {
            PublishOutcome::Stored => {}
            PublishOutcome::OverwroteOldest => {
                self.diag.overflows.fetch_add(1, Ordering::Relaxed);
                warn!("ring overflow, oldest unread block dropped");
            }
            PublishOutcome::DroppedIncoming => {
                self.diag.overflows.fetch_add(1, Ordering::Relaxed);
                warn!("ring pinned by reader, incoming block dropped");
            }
        }
    }
}
