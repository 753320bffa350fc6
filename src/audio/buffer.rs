//! Bounded blocking buffer of fixed-size audio blocks
//!
//! The producer thread pushes whole `FrameBlock`s; the output callback pops
//! them at device cadence. The ring owns a contiguous slab of
//! `capacity * slot_len` samples and moves one block per operation with a
//! single bounded copy plus index arithmetic.
//!
//! ## Threading contract
//!
//! One internal mutex guards the cursors *and* the slot copy, so a push and
//! a pop can never touch the same slot concurrently. One condvar signals
//! "space available or shutdown":
//! - the producer parks in [`BlockRing::wait_while_full`] when the ring is
//!   full,
//! - the consumer calls [`BlockRing::notify_space`] once occupancy drains
//!   past its low-water mark,
//! - [`BlockRing::shutdown`] wakes every waiter unconditionally so stopping
//!   never hangs on a wait that nothing will clear.
//!
//! Pushing while full and popping while empty are programming errors in the
//! producer/consumer pairing; both log at error severity and leave the ring
//! untouched.

use std::sync::{Condvar, Mutex};

/// One fixed-size chunk of interleaved multi-channel samples.
///
/// Layout is frame-major: `samples[frame * channels + channel]`. Channel
/// count and frame count are fixed at construction; every block moved
/// through one ring instance has the same sample length.
pub struct FrameBlock {
    channels: usize,
    frames: usize,
    samples: Box<[f32]>,
}

impl FrameBlock {
    /// Create a zeroed block.
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels,
            frames,
            samples: vec![0.0; channels * frames].into_boxed_slice(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Total sample count (`channels * frames`).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Zero every sample.
    pub fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }
}

struct RingState {
    /// Backing storage, `capacity` slots of `slot_len` samples each.
    samples: Box<[f32]>,
    /// Next slot to pop (block index).
    head: usize,
    /// Next slot to push (block index).
    tail: usize,
    /// Occupied slots.
    count: usize,
    full: bool,
    shutdown: bool,
}

/// Bounded FIFO ring of `FrameBlock` slots.
pub struct BlockRing {
    state: Mutex<RingState>,
    space: Condvar,
    capacity: usize,
    channels: usize,
    frames: usize,
    slot_len: usize,
}

impl BlockRing {
    /// Create a ring of `capacity` blocks, each `channels * frames` samples.
    pub fn new(capacity: usize, channels: usize, frames: usize) -> Self {
        let slot_len = channels * frames;
        Self {
            state: Mutex::new(RingState {
                samples: vec![0.0; capacity * slot_len].into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
                full: false,
                shutdown: false,
            }),
            space: Condvar::new(),
            capacity,
            channels,
            frames,
            slot_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Occupied slot count.
    pub fn occupancy(&self) -> usize {
        self.state.lock().unwrap().count
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().unwrap().full
    }

    /// Copy `block` into the tail slot.
    ///
    /// The caller must ensure the ring is not full; a push while full is
    /// logged and dropped.
    pub fn push(&self, block: &FrameBlock) {
        if block.len() != self.slot_len {
            log::error!(
                "BlockRing::push: block has {} samples, slot holds {}",
                block.len(),
                self.slot_len
            );
            return;
        }
        let mut st = self.state.lock().unwrap();
        if st.full {
            log::error!("BlockRing::push: buffer full, dropping block");
            return;
        }
        let start = st.tail * self.slot_len;
        st.samples[start..start + self.slot_len].copy_from_slice(block.as_slice());
        st.tail = (st.tail + 1) % self.capacity;
        st.count += 1;
        if st.count == self.capacity {
            st.full = true;
        }
    }

    /// Copy the head slot into `out` and free it.
    ///
    /// Returns false (and leaves `out` untouched) on an empty ring.
    pub fn pop_into(&self, out: &mut FrameBlock) -> bool {
        if out.len() != self.slot_len {
            log::error!(
                "BlockRing::pop_into: block has {} samples, slot holds {}",
                out.len(),
                self.slot_len
            );
            return false;
        }
        let mut st = self.state.lock().unwrap();
        if st.count == 0 {
            log::error!("BlockRing::pop_into: empty buffer");
            return false;
        }
        let start = st.head * self.slot_len;
        out.as_mut_slice()
            .copy_from_slice(&st.samples[start..start + self.slot_len]);
        st.head = (st.head + 1) % self.capacity;
        st.count -= 1;
        st.full = false;
        true
    }

    /// Reset to empty without reallocating. Must not race an in-flight
    /// push/pop; callers quiesce the producer first.
    pub fn purge(&self) {
        let mut st = self.state.lock().unwrap();
        st.head = 0;
        st.tail = 0;
        st.count = 0;
        st.full = false;
        log::debug!("BlockRing: purged");
    }

    /// Block the calling thread while the ring is full and not shut down.
    pub fn wait_while_full(&self) {
        let mut st = self.state.lock().unwrap();
        while st.full && !st.shutdown {
            st = self.space.wait(st).unwrap();
        }
    }

    /// Wake any thread parked in [`wait_while_full`](Self::wait_while_full).
    pub fn notify_space(&self) {
        self.space.notify_all();
    }

    /// Mark the ring shut down and wake all waiters. Later
    /// `wait_while_full` calls return immediately.
    pub fn shutdown(&self) {
        let mut st = self.state.lock().unwrap();
        st.shutdown = true;
        drop(st);
        self.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Block whose samples encode `seed` so FIFO order is checkable.
    fn patterned(channels: usize, frames: usize, seed: f32) -> FrameBlock {
        let mut block = FrameBlock::new(channels, frames);
        for (i, s) in block.as_mut_slice().iter_mut().enumerate() {
            *s = seed + i as f32 * 0.001;
        }
        block
    }

    #[test]
    fn occupancy_tracks_pushes_and_pops() {
        let ring = BlockRing::new(8, 2, 16);
        let block = patterned(2, 16, 1.0);
        let mut out = FrameBlock::new(2, 16);

        for n in 1..=5 {
            ring.push(&block);
            assert_eq!(ring.occupancy(), n);
        }
        for n in (2..=4).rev() {
            assert!(ring.pop_into(&mut out));
            assert_eq!(ring.occupancy(), n);
        }
        assert!(!ring.is_full());
    }

    #[test]
    fn fifo_round_trip_is_byte_identical() {
        let ring = BlockRing::new(4, 2, 8);
        for i in 0..3 {
            ring.push(&patterned(2, 8, i as f32));
        }
        let mut out = FrameBlock::new(2, 8);
        for i in 0..3 {
            assert!(ring.pop_into(&mut out));
            assert_eq!(out.as_slice(), patterned(2, 8, i as f32).as_slice());
        }
    }

    #[test]
    fn wraparound_preserves_order_across_cycles() {
        let capacity = 4;
        let ring = BlockRing::new(capacity, 1, 4);
        let mut out = FrameBlock::new(1, 4);

        // Offset head/tail so later pushes wrap the slot array.
        ring.push(&patterned(1, 4, 100.0));
        ring.push(&patterned(1, 4, 101.0));
        assert!(ring.pop_into(&mut out));
        assert!(ring.pop_into(&mut out));

        // More than two full cycles in strict FIFO order.
        let total = capacity * 2 + 3;
        for i in 0..total {
            ring.push(&patterned(1, 4, i as f32));
            assert!(ring.pop_into(&mut out));
            assert_eq!(out.as_slice(), patterned(1, 4, i as f32).as_slice());
        }
    }

    #[test]
    fn push_while_full_is_dropped() {
        let ring = BlockRing::new(3, 1, 4);
        for i in 0..3 {
            ring.push(&patterned(1, 4, i as f32));
        }
        assert!(ring.is_full());

        ring.push(&patterned(1, 4, 99.0));
        assert_eq!(ring.occupancy(), 3);

        let mut out = FrameBlock::new(1, 4);
        for i in 0..3 {
            assert!(ring.pop_into(&mut out));
            assert_eq!(out.as_slice(), patterned(1, 4, i as f32).as_slice());
        }
    }

    #[test]
    fn pop_from_empty_fails_without_touching_out() {
        let ring = BlockRing::new(3, 1, 4);
        let mut out = patterned(1, 4, 7.0);
        let before: Vec<f32> = out.as_slice().to_vec();

        assert!(!ring.pop_into(&mut out));
        assert_eq!(out.as_slice(), &before[..]);
    }

    #[test]
    fn mismatched_block_is_rejected() {
        let ring = BlockRing::new(3, 2, 8);
        ring.push(&patterned(2, 4, 0.0));
        assert_eq!(ring.occupancy(), 0);

        ring.push(&patterned(2, 8, 0.0));
        let mut short = FrameBlock::new(2, 4);
        assert!(!ring.pop_into(&mut short));
        assert_eq!(ring.occupancy(), 1);
    }

    #[test]
    fn purge_resets_to_empty() {
        let ring = BlockRing::new(4, 1, 4);
        for _ in 0..4 {
            ring.push(&patterned(1, 4, 0.0));
        }
        assert!(ring.is_full());

        ring.purge();
        assert_eq!(ring.occupancy(), 0);
        assert!(!ring.is_full());

        // Usable again from slot zero.
        ring.push(&patterned(1, 4, 5.0));
        let mut out = FrameBlock::new(1, 4);
        assert!(ring.pop_into(&mut out));
        assert_eq!(out.as_slice(), patterned(1, 4, 5.0).as_slice());
    }

    #[test]
    fn consumer_notify_resumes_blocked_producer() {
        let capacity = 4;
        let ring = Arc::new(BlockRing::new(capacity, 1, 4));
        let total = capacity + 3;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..total {
                    ring.wait_while_full();
                    ring.push(&patterned(1, 4, i as f32));
                }
            })
        };

        let mut out = FrameBlock::new(1, 4);
        let mut received = 0;
        while received < total {
            if ring.occupancy() > 0 {
                assert!(ring.pop_into(&mut out));
                assert_eq!(out.as_slice(), patterned(1, 4, received as f32).as_slice());
                received += 1;
                ring.notify_space();
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_blocked_producer() {
        let ring = Arc::new(BlockRing::new(2, 1, 4));
        for _ in 0..2 {
            ring.push(&patterned(1, 4, 0.0));
        }

        let waiter = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.wait_while_full())
        };

        thread::sleep(Duration::from_millis(10));
        ring.shutdown();
        waiter.join().unwrap();
    }
}
