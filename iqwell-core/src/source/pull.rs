//! Consumer side of the stream: exact-length pulls over checked-out slots.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use num_complex::Complex32;

use crate::buffering::{RingWait, Slot, SlotRing};
use crate::convert;
use crate::diag::SourceDiagnostics;
use crate::error::Result;

/// How a pull finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// The output slice was filled completely.
    Complete,
    /// The stream ended before the request could be satisfied. The output
    /// contents are unspecified.
    EndOfStream,
}

/// Read position inside the slot the consumer currently owns.
struct SlotCursor {
    slot: Slot,
    /// Sample pairs already consumed.
    offset: usize,
    total: usize,
}

impl SlotCursor {
    fn new(slot: Slot) -> Self {
        let total = convert::samples_in(slot.bytes().len());
        Self {
            slot,
            offset: 0,
            total,
        }
    }

    fn remaining(&self) -> usize {
        self.total - self.offset
    }

    fn convert_into(&mut self, out: &mut [Complex32]) {
        convert::convert_pairs(self.slot.bytes(), self.offset, out);
        self.offset += out.len();
    }

    fn into_slot(self) -> Slot {
        self.slot
    }
}

/// Pull-side state. Owned by `IqSource`, which serializes access; nothing
/// here is shared with the acquisition thread except the ring itself.
pub(crate) struct Puller {
    ring: Arc<SlotRing>,
    diag: Arc<SourceDiagnostics>,
    current: Option<SlotCursor>,
    samples_per_slot: usize,
    min_fill_slots: usize,
    pull_timeout: Option<Duration>,
}

impl Puller {
    pub(crate) fn new(
        ring: Arc<SlotRing>,
        diag: Arc<SourceDiagnostics>,
        min_fill_slots: usize,
        pull_timeout: Option<Duration>,
    ) -> Self {
        let samples_per_slot = convert::samples_in(ring.slot_bytes());
        Self {
            ring,
            diag,
            current: None,
            samples_per_slot,
            min_fill_slots,
            pull_timeout,
        }
    }

    /// Samples reachable without further production: the rest of the held
    /// slot plus everything still queued in the ring.
    fn buffered_samples(&self) -> usize {
        let held = self.current.as_ref().map_or(0, SlotCursor::remaining);
        held + self.ring.buffered_slots() * self.samples_per_slot
    }

    /// Fill `out` completely with the next consecutive samples.
    ///
    /// Waits for the ring to reach `min_fill_slots` first. Once the stream
    /// has closed, buffered data keeps getting served as long as a whole
    /// request can be satisfied; a request larger than what is left reports
    /// `EndOfStream` instead of a short read.
    pub(crate) fn pull_into(&mut self, out: &mut [Complex32]) -> Result<PullStatus> {
        if out.is_empty() {
            return Ok(PullStatus::Complete);
        }

        match self
            .ring
            .wait_min_fill(self.min_fill_slots, self.pull_timeout)?
        {
            RingWait::Ready => {}
            RingWait::Closed => {
                if self.buffered_samples() < out.len() {
                    return Ok(PullStatus::EndOfStream);
                }
            }
        }

        let mut at = 0;
        while at < out.len() {
            if self.current.as_ref().map_or(true, |c| c.remaining() == 0) {
                let finished = self.current.take().map(SlotCursor::into_slot);
                match self.ring.next_slot(finished, self.pull_timeout)? {
                    Some(slot) => self.current = Some(SlotCursor::new(slot)),
                    None => return Ok(PullStatus::EndOfStream),
                }
            }
            if let Some(cursor) = self.current.as_mut() {
                let take = cursor.remaining().min(out.len() - at);
                cursor.convert_into(&mut out[at..at + take]);
                at += take;
            }
        }

        self.diag
            .samples_out
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        Ok(PullStatus::Complete)
    }

    /// Allocating variant; `Ok(None)` is end-of-stream.
    pub(crate) fn pull(&mut self, count: usize) -> Result<Option<Vec<Complex32>>> {
        let mut out = vec![Complex32::new(0.0, 0.0); count];
        match self.pull_into(&mut out)? {
            PullStatus::Complete => Ok(Some(out)),
            PullStatus::EndOfStream => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::PublishOutcome;
    use crate::convert::IQ_SCALE;
    use crate::error::IqwellError;

    /// I counts up per slot (wrapping at i16 range), Q carries the slot
    /// marker, so both the position inside a slot and the slot order are
    /// visible in the output.
    fn publish_pattern(ring: &SlotRing, marker: i16) {
        let outcome = ring.publish_with(|bytes| {
            for (j, pair) in bytes.chunks_exact_mut(4).enumerate() {
                let i = (j % 32_768) as i16;
                pair[..2].copy_from_slice(&i.to_le_bytes());
                pair[2..].copy_from_slice(&marker.to_le_bytes());
            }
        });
        assert_eq!(outcome, PublishOutcome::Stored);
    }

    fn expected(i: i16, q: i16) -> Complex32 {
        Complex32::new(f32::from(i) * IQ_SCALE, f32::from(q) * IQ_SCALE)
    }

    fn puller_for(ring: &Arc<SlotRing>, min_fill: usize) -> Puller {
        Puller::new(
            Arc::clone(ring),
            Arc::new(SourceDiagnostics::default()),
            min_fill,
            None,
        )
    }

    #[test]
    fn request_crossing_a_slot_boundary_stays_contiguous() {
        let ring = Arc::new(SlotRing::new(15, 262_144));
        for marker in 0..3 {
            publish_pattern(&ring, marker);
        }
        let mut puller = puller_for(&ring, 3);

        let out = puller.pull(70_000).expect("pull").expect("stream open");

        assert_eq!(out.len(), 70_000);
        // First slot: 65_536 samples, marker 0.
        assert_eq!(out[0], expected(0, 0));
        assert_eq!(out[65_535], expected(32_767, 0));
        // The remaining 4_464 come from the start of the next slot.
        assert_eq!(out[65_536], expected(0, 1));
        assert_eq!(out[69_999], expected(4_463, 1));

        let cursor = puller.current.as_ref().expect("held slot");
        assert_eq!(cursor.offset, 4_464);
        assert_eq!(ring.used(), 2);
        assert_eq!(ring.buffered_slots(), 1);
        assert_eq!(
            puller.diag.samples_out.load(Ordering::Relaxed),
            70_000
        );
    }

    #[test]
    fn small_pulls_from_a_held_slot_release_nothing() {
        let ring = Arc::new(SlotRing::new(4, 64));
        for marker in 0..3 {
            publish_pattern(&ring, marker);
        }
        let mut puller = puller_for(&ring, 3);

        let first = puller.pull(4).expect("pull").expect("stream open");
        assert_eq!(first[0], expected(0, 0));
        assert_eq!(ring.used(), 3);
        assert_eq!(ring.buffered_slots(), 2);

        let second = puller.pull(4).expect("pull").expect("stream open");
        assert_eq!(second[0], expected(4, 0));
        assert_eq!(ring.used(), 3);
        assert_eq!(ring.buffered_slots(), 2);
        assert_eq!(puller.current.as_ref().expect("held slot").offset, 8);
    }

    #[test]
    fn closed_empty_ring_reports_end_of_stream() {
        let ring = Arc::new(SlotRing::new(4, 64));
        ring.close();
        let mut puller = puller_for(&ring, 3);

        let mut out = vec![Complex32::new(0.0, 0.0); 5];
        assert_eq!(
            puller.pull_into(&mut out).expect("pull"),
            PullStatus::EndOfStream
        );
        assert!(puller.pull(5).expect("pull").is_none());
    }

    #[test]
    fn drain_serves_whole_requests_until_data_runs_short() {
        let ring = Arc::new(SlotRing::new(2, 64));
        publish_pattern(&ring, 7);
        publish_pattern(&ring, 8);
        ring.close();
        let mut puller = puller_for(&ring, 3);

        // 32 samples buffered; a 20-sample request drains across both slots.
        let first = puller.pull(20).expect("pull").expect("drain");
        assert_eq!(first[15], expected(15, 7));
        assert_eq!(first[16], expected(0, 8));

        // 12 samples left: too few for 20, enough for 8.
        assert!(puller.pull(20).expect("pull").is_none());
        let third = puller.pull(8).expect("pull").expect("drain");
        assert_eq!(third[0], expected(4, 8));
        assert_eq!(third[7], expected(11, 8));
    }

    #[test]
    fn silent_ring_with_a_timeout_reports_a_stall() {
        let ring = Arc::new(SlotRing::new(4, 64));
        let mut puller = Puller::new(
            Arc::clone(&ring),
            Arc::new(SourceDiagnostics::default()),
            1,
            Some(Duration::from_millis(30)),
        );

        let mut out = vec![Complex32::new(0.0, 0.0); 4];
        assert!(matches!(
            puller.pull_into(&mut out),
            Err(IqwellError::AcquisitionStalled)
        ));
    }

    #[test]
    fn empty_requests_finish_without_waiting() {
        let ring = Arc::new(SlotRing::new(4, 64));
        let mut puller = puller_for(&ring, 3);

        assert_eq!(
            puller.pull_into(&mut []).expect("pull"),
            PullStatus::Complete
        );
        assert_eq!(puller.pull(0).expect("pull").expect("empty").len(), 0);
    }
}
