//! Multi-slot ring buffer between the acquisition callback and the puller.
//!
//! ## Protocol
//!
//! The ring owns a fixed pool of `slot_count` byte slots of `slot_bytes`
//! each, so buffered memory is bounded at `slot_count * slot_bytes` no
//! matter how far the consumer falls behind. Producer side: `publish_with`
//! fills the next spare slot under the lock and appends it to the filled
//! queue. When no spare slot exists the oldest unread slot is overwritten
//! instead, and the producer is never blocked: the acquisition callback has
//! no way to pause the hardware. Consumer side: `next_slot` checks the
//! oldest filled slot out of the ring, the caller reads it lock-free at its
//! own pace, and the slot returns to the spare pool on the following
//! `next_slot` call.
//!
//! A slot checked out to the consumer still counts toward `used()` and is
//! never an overwrite victim. `close()` marks the producer gone and wakes
//! every waiter so a blocked consumer observes end-of-stream instead of
//! hanging.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{IqwellError, Result};

/// One fixed-capacity raw buffer, sized to a single acquisition callback.
#[derive(Debug)]
pub struct Slot {
    bytes: Box<[u8]>,
}

impl Slot {
    fn with_capacity(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// What `publish_with` did with the incoming block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored into a spare slot.
    Stored,
    /// Ring was full: the oldest unread slot was dropped to make room.
    OverwroteOldest,
    /// Every slot was in use, including by the reader; block discarded.
    DroppedIncoming,
}

/// Result of waiting for the fill threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingWait {
    /// Enough slots are buffered and the producer is alive.
    Ready,
    /// The producer is gone; whatever is buffered is all there will be.
    Closed,
}

struct RingState {
    /// Spare slots available for the producer.
    free: Vec<Slot>,
    /// Published slots in arrival order; front is the oldest unread.
    filled: VecDeque<Slot>,
    /// Whether the consumer currently holds a slot outside the ring.
    checked_out: bool,
    /// Set once the producer has exited; never cleared.
    closed: bool,
}

pub struct SlotRing {
    state: Mutex<RingState>,
    readable: Condvar,
    slot_count: usize,
    slot_bytes: usize,
}

impl SlotRing {
    /// Allocate all `slot_count` slots up front. Slots are reused for the
    /// lifetime of the ring; no allocation happens on the data path.
    pub fn new(slot_count: usize, slot_bytes: usize) -> Self {
        let free = (0..slot_count)
            .map(|_| Slot::with_capacity(slot_bytes))
            .collect();
        Self {
            state: Mutex::new(RingState {
                free,
                filled: VecDeque::with_capacity(slot_count),
                checked_out: false,
                closed: false,
            }),
            readable: Condvar::new(),
            slot_count,
            slot_bytes,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Filled slots, counting one the consumer has checked out.
    pub fn used(&self) -> usize {
        let state = self.state.lock();
        state.filled.len() + usize::from(state.checked_out)
    }

    /// Filled slots still inside the ring.
    pub fn buffered_slots(&self) -> usize {
        self.state.lock().filled.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reserve the write target, let `fill` copy into it, and publish it as
    /// the newest filled slot, all in one lock scope. Signals the condition
    /// variable once per call, after the mutation is visible.
    pub fn publish_with(&self, fill: impl FnOnce(&mut [u8])) -> PublishOutcome {
        let mut state = self.state.lock();

        let (mut slot, outcome) = if let Some(slot) = state.free.pop() {
            (slot, PublishOutcome::Stored)
        } else if let Some(slot) = state.filled.pop_front() {
            (slot, PublishOutcome::OverwroteOldest)
        } else {
            // The only slot left is in the reader's hands; nothing can be
            // overwritten safely, so the incoming block is lost instead.
            drop(state);
            self.readable.notify_one();
            return PublishOutcome::DroppedIncoming;
        };

        fill(slot.bytes_mut());
        state.filled.push_back(slot);
        drop(state);
        self.readable.notify_one();
        outcome
    }

    /// Block until `used() >= min_fill` or the ring is closed.
    ///
    /// With a timeout configured, a full period with no wakeup while the
    /// condition is unmet fails with `AcquisitionStalled`. Publishes reset
    /// the period, so a slow but live producer never trips it.
    pub fn wait_min_fill(&self, min_fill: usize, timeout: Option<Duration>) -> Result<RingWait> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Ok(RingWait::Closed);
            }
            if state.filled.len() + usize::from(state.checked_out) >= min_fill {
                return Ok(RingWait::Ready);
            }
            match timeout {
                None => self.readable.wait(&mut state),
                Some(limit) => {
                    if self.readable.wait_for(&mut state, limit).timed_out() {
                        if state.closed {
                            return Ok(RingWait::Closed);
                        }
                        if state.filled.len() + usize::from(state.checked_out) >= min_fill {
                            return Ok(RingWait::Ready);
                        }
                        return Err(IqwellError::AcquisitionStalled);
                    }
                }
            }
        }
    }

    /// Return the finished slot (if any) to the spare pool and check out the
    /// oldest filled slot. Blocks while the ring is empty and open; `None`
    /// means closed and fully drained.
    pub fn next_slot(
        &self,
        finished: Option<Slot>,
        timeout: Option<Duration>,
    ) -> Result<Option<Slot>> {
        let mut state = self.state.lock();
        if let Some(slot) = finished {
            state.free.push(slot);
            state.checked_out = false;
        }
        loop {
            if let Some(slot) = state.filled.pop_front() {
                state.checked_out = true;
                return Ok(Some(slot));
            }
            if state.closed {
                return Ok(None);
            }
            match timeout {
                None => self.readable.wait(&mut state),
                Some(limit) => {
                    if self.readable.wait_for(&mut state, limit).timed_out() {
                        if let Some(slot) = state.filled.pop_front() {
                            state.checked_out = true;
                            return Ok(Some(slot));
                        }
                        if state.closed {
                            return Ok(None);
                        }
                        return Err(IqwellError::AcquisitionStalled);
                    }
                }
            }
        }
    }

    /// Mark the producer gone and wake every waiter. Idempotent. The flag is
    /// flipped under the lock so a waiter cannot recheck between the store
    /// and the notify and then sleep forever.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn marked_block(ring: &SlotRing, marker: u8) -> PublishOutcome {
        ring.publish_with(|dst| {
            dst.fill(marker);
        })
    }

    #[test]
    fn publish_beyond_capacity_drops_oldest_and_caps_used() {
        let ring = SlotRing::new(4, 8);

        for marker in 0u8..4 {
            assert_eq!(marked_block(&ring, marker), PublishOutcome::Stored);
            assert!(ring.used() <= 4);
        }
        for marker in 4u8..6 {
            assert_eq!(marked_block(&ring, marker), PublishOutcome::OverwroteOldest);
            assert_eq!(ring.used(), 4);
        }

        // Markers 0 and 1 were displaced; the oldest retained slot is 2.
        let mut finished = None;
        for expected in 2u8..6 {
            let slot = ring
                .next_slot(finished.take(), Some(Duration::from_millis(200)))
                .expect("ring open")
                .expect("slot available");
            assert!(slot.bytes().iter().all(|b| *b == expected));
            finished = Some(slot);
        }
    }

    #[test]
    fn slots_come_back_in_publish_order() {
        let ring = SlotRing::new(3, 4);
        for marker in 10u8..13 {
            marked_block(&ring, marker);
        }

        let first = ring.next_slot(None, None).unwrap().unwrap();
        assert_eq!(first.bytes()[0], 10);
        let second = ring.next_slot(Some(first), None).unwrap().unwrap();
        assert_eq!(second.bytes()[0], 11);
        let third = ring.next_slot(Some(second), None).unwrap().unwrap();
        assert_eq!(third.bytes()[0], 12);
    }

    #[test]
    fn checked_out_slot_counts_as_used() {
        let ring = SlotRing::new(3, 4);
        marked_block(&ring, 1);
        marked_block(&ring, 2);
        assert_eq!(ring.used(), 2);

        let held = ring.next_slot(None, None).unwrap().unwrap();
        assert_eq!(ring.used(), 2);
        assert_eq!(ring.buffered_slots(), 1);

        let next = ring.next_slot(Some(held), None).unwrap().unwrap();
        assert_eq!(ring.used(), 1);
        drop(next);
    }

    #[test]
    fn full_ring_with_reader_holding_last_slot_drops_incoming() {
        let ring = SlotRing::new(1, 4);
        assert_eq!(marked_block(&ring, 7), PublishOutcome::Stored);

        let held = ring.next_slot(None, None).unwrap().unwrap();
        assert_eq!(marked_block(&ring, 8), PublishOutcome::DroppedIncoming);
        assert_eq!(ring.used(), 1);
        assert_eq!(held.bytes()[0], 7);
    }

    #[test]
    fn close_wakes_a_blocked_fill_waiter() {
        let ring = Arc::new(SlotRing::new(4, 8));
        let (tx, rx) = mpsc::channel();

        let waiter_ring = Arc::clone(&ring);
        let waiter = thread::spawn(move || {
            let outcome = waiter_ring.wait_min_fill(3, None);
            tx.send(outcome).expect("send wait outcome");
        });

        thread::sleep(Duration::from_millis(20));
        ring.close();

        let outcome = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("waiter never woke after close");
        assert!(matches!(outcome, Ok(RingWait::Closed)));
        waiter.join().expect("waiter thread panicked");
    }

    #[test]
    fn wait_min_fill_times_out_on_a_silent_ring() {
        let ring = SlotRing::new(4, 8);
        let outcome = ring.wait_min_fill(1, Some(Duration::from_millis(30)));
        assert!(matches!(outcome, Err(IqwellError::AcquisitionStalled)));
    }

    #[test]
    fn next_slot_drains_after_close() {
        let ring = SlotRing::new(3, 4);
        marked_block(&ring, 42);
        ring.close();

        let slot = ring.next_slot(None, None).unwrap().expect("buffered slot");
        assert_eq!(slot.bytes()[0], 42);
        assert!(ring.next_slot(Some(slot), None).unwrap().is_none());
    }
}
