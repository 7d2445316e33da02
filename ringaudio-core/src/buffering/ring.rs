//! Fixed-capacity stereo ring shared by one producer and one consumer.
//!
//! ## Cursors
//!
//! Two monotonically increasing frame counters replace the classic
//! `start`/`end`/`size` triple:
//!
//! - `write_pos`: total frames ever written. Stored only by the producer.
//! - `read_pos`: total frames consumed or discarded. Advanced by the consumer
//!   on `pull` and by the producer when a write overflows.
//!
//! `start = read_pos mod capacity`, `size = write_pos - read_pos` and
//! `end = write_pos mod capacity`, so `end == (start + size) mod capacity`
//! holds by construction.
//!
//! ## Memory ordering
//!
//! Samples live in `AtomicU32` cells (f32 bit patterns) so that a consumer
//! racing an overwriting producer reads stale or fresh values, never UB.
//!
//! Producer (`write`):
//! 1. `read_pos.fetch_max(floor, AcqRel)` when the write would overflow.
//! 2. `fence(Release)`, then relaxed sample stores into `[end, end + n)`.
//! 3. `write_pos.store(Release)` publishes the frames.
//!
//! Consumer (`pull`):
//! 1. `read_pos.load(Acquire)`, `write_pos.load(Acquire)`.
//! 2. Relaxed sample loads from `[start, start + avail)`.
//! 3. `fence(Acquire)`, then `read_pos.compare_exchange(AcqRel)`.
//!
//! The producer only touches slots the consumer is reading after moving
//! `read_pos` past them. If the consumer observed any such store, its acquire
//! fence pairs with the producer's release fence, the CAS sees the moved
//! cursor and fails, and the read is retried from the new `start`. Neither
//! side ever blocks.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tracing::debug;

use super::sizing::capacity_for_latency;

/// Interleaved samples per frame (left, right).
pub const CHANNELS: usize = 2;

/// Pull attempts before the consumer gives up on a quantum and emits silence.
/// Only reachable while the producer keeps overwriting the region being read.
const MAX_PULL_ATTEMPTS: usize = 4;

/// Point-in-time view of the ring cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    /// Read index in `[0, capacity)`.
    pub start: usize,
    /// Write index in `[0, capacity)`.
    pub end: usize,
    /// Buffered frames in `[0, capacity]`.
    pub size: usize,
}

/// Power-of-two stereo ring with overwrite-oldest writes and silence-on-underrun
/// pulls. Share it between producer and consumer with `Arc<RingAudioBuffer>`.
pub struct RingAudioBuffer {
    left: Box<[AtomicU32]>,
    right: Box<[AtomicU32]>,
    mask: usize,
    sample_rate: u32,
    read_pos: AtomicU64,
    write_pos: AtomicU64,
    last_write_size: AtomicUsize,
    nonblocking: AtomicBool,
    /// Frames lost to the overwrite policy since creation or `clear`.
    discarded: AtomicU64,
}

impl RingAudioBuffer {
    /// Allocate a ring holding `capacity_frames` rounded up to a power of two.
    pub fn with_capacity(capacity_frames: usize, sample_rate: u32) -> Self {
        let capacity = capacity_frames.max(1).next_power_of_two();
        let silent_channel = || {
            (0..capacity)
                .map(|_| AtomicU32::new(0f32.to_bits()))
                .collect::<Box<[_]>>()
        };

        Self {
            left: silent_channel(),
            right: silent_channel(),
            mask: capacity - 1,
            sample_rate,
            read_pos: AtomicU64::new(0),
            write_pos: AtomicU64::new(0),
            last_write_size: AtomicUsize::new(0),
            nonblocking: AtomicBool::new(false),
            discarded: AtomicU64::new(0),
        }
    }

    /// Allocate a ring sized for `latency_ms` at `sample_rate`.
    /// See [`capacity_for_latency`].
    pub fn for_latency(latency_ms: i32, sample_rate: u32, overhead_ms: i32) -> Self {
        Self::with_capacity(
            capacity_for_latency(latency_ms, sample_rate, overhead_ms),
            sample_rate,
        )
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Sample rate the ring was sized for (Hz).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // ── Producer ─────────────────────────────────────────────────────────────

    /// Append interleaved stereo frames. A trailing odd sample is ignored.
    ///
    /// When free space is short, the oldest unread frames are discarded so the
    /// whole chunk fits. A chunk longer than the ring keeps only its final
    /// `capacity` frames. Always returns the chunk's frame count.
    ///
    /// Producer role only: at most one thread may call `write` at a time.
    pub fn write(&self, samples: &[f32]) -> usize {
        let frames = samples.len() / CHANNELS;
        let capacity = self.capacity();

        let w = self.write_pos.load(Ordering::Relaxed);
        let new_w = w + frames as u64;
        let floor = new_w.saturating_sub(capacity as u64);

        if floor > self.read_pos.load(Ordering::Acquire) {
            let prev_r = self.read_pos.fetch_max(floor, Ordering::AcqRel);
            if floor > prev_r {
                let lost = floor - prev_r;
                self.discarded.fetch_add(lost, Ordering::Relaxed);
                debug!(lost, frames, capacity, "ring overflow: discarded oldest frames");
            }
        }
        fence(Ordering::Release);

        let skip = frames.saturating_sub(capacity);
        let first = ((w + skip as u64) as usize) & self.mask;
        let (head, tail) = segments(first, frames - skip, capacity);
        let src = samples[skip * CHANNELS..frames * CHANNELS].chunks_exact(CHANNELS);
        for (idx, frame) in head.chain(tail).zip(src) {
            self.left[idx].store(frame[0].to_bits(), Ordering::Relaxed);
            self.right[idx].store(frame[1].to_bits(), Ordering::Relaxed);
        }

        self.write_pos.store(new_w, Ordering::Release);
        self.last_write_size.store(frames, Ordering::Relaxed);
        frames
    }

    /// Unused capacity in frames.
    pub fn write_available(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Advisory backpressure probe.
    ///
    /// `true` in nonblocking mode or before the first write; otherwise `true`
    /// iff a chunk the size of the previous write would fit without
    /// overwriting. The consumer may drain in between, so this is a hint.
    pub fn enough_space(&self) -> bool {
        if self.is_nonblocking() {
            return true;
        }
        let last = self.last_write_size.load(Ordering::Relaxed);
        last == 0 || last < self.write_available()
    }

    /// Frames accepted by the most recent `write`.
    pub fn last_write_size(&self) -> usize {
        self.last_write_size.load(Ordering::Relaxed)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::Relaxed);
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    // ── Consumer ─────────────────────────────────────────────────────────────

    /// Drain up to `min(left.len(), right.len())` frames into planar outputs.
    ///
    /// Returns the frames supplied. Slots past that count are left untouched;
    /// the caller pre-fills them with silence. One exception: if the producer
    /// overwrites the region being read on every attempt, the pull gives up,
    /// returns 0 and resets the slots it had already filled to `0.0`.
    ///
    /// Consumer role only: at most one thread may call `pull` at a time.
    pub fn pull(&self, left: &mut [f32], right: &mut [f32]) -> usize {
        let requested = left.len().min(right.len());
        self.pull_with(requested, |i, l, r| {
            left[i] = l;
            right[i] = r;
        })
    }

    /// Drain into an interleaved buffer of `channels` channels, writing left and
    /// right to channels 0 and 1. Other channels are left untouched.
    pub fn pull_interleaved(&self, out: &mut [f32], channels: usize) -> usize {
        if channels < CHANNELS {
            return 0;
        }
        let requested = out.len() / channels;
        self.pull_with(requested, |i, l, r| {
            let base = i * channels;
            out[base] = l;
            out[base + 1] = r;
        })
    }

    fn pull_with(&self, requested: usize, mut emit: impl FnMut(usize, f32, f32)) -> usize {
        let capacity = self.capacity();
        let mut touched = 0;

        for _ in 0..MAX_PULL_ATTEMPTS {
            let r = self.read_pos.load(Ordering::Acquire);
            let w = self.write_pos.load(Ordering::Acquire);
            let avail = (w.saturating_sub(r) as usize).min(requested).min(capacity);
            if avail == 0 {
                return 0;
            }

            let (head, tail) = segments((r as usize) & self.mask, avail, capacity);
            for (i, idx) in head.chain(tail).enumerate() {
                emit(
                    i,
                    f32::from_bits(self.left[idx].load(Ordering::Relaxed)),
                    f32::from_bits(self.right[idx].load(Ordering::Relaxed)),
                );
            }
            touched = touched.max(avail);

            fence(Ordering::Acquire);
            if self
                .read_pos
                .compare_exchange(r, r + avail as u64, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return avail;
            }
        }

        // Producer kept lapping us; anything emitted may be torn.
        for i in 0..touched {
            emit(i, 0.0, 0.0);
        }
        0
    }

    // ── Shared ───────────────────────────────────────────────────────────────

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.cursors().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of `start`, `end` and `size`.
    pub fn cursors(&self) -> Cursors {
        let r = self.read_pos.load(Ordering::Acquire);
        let w = self.write_pos.load(Ordering::Acquire).max(r);
        Cursors {
            start: (r as usize) & self.mask,
            end: (w as usize) & self.mask,
            size: ((w - r) as usize).min(self.capacity()),
        }
    }

    /// Total frames discarded by the overwrite policy.
    pub fn discarded_frames(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Restart the discard count without touching buffered frames.
    pub fn reset_discarded(&self) {
        self.discarded.store(0, Ordering::Relaxed);
    }

    /// Zero cursors, the last-write heuristic and the discard counter.
    ///
    /// Contents become unreachable. Only call while neither role is active.
    pub fn clear(&self) {
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
        self.last_write_size.store(0, Ordering::Relaxed);
        self.discarded.store(0, Ordering::Relaxed);
    }
}

impl fmt::Debug for RingAudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingAudioBuffer")
            .field("capacity", &self.capacity())
            .field("sample_rate", &self.sample_rate)
            .field("cursors", &self.cursors())
            .field("last_write_size", &self.last_write_size())
            .field("nonblocking", &self.is_nonblocking())
            .finish()
    }
}

/// Split `len` slots starting at `start` into the run before the wrap and the
/// run after it.
fn segments(start: usize, len: usize, capacity: usize) -> (Range<usize>, Range<usize>) {
    let head = len.min(capacity - start);
    (start..start + head, 0..len - head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SENTINEL: f32 = -7.0;

    /// Interleaved frames `from..to`, left = n, right = -n.
    fn ramp(from: usize, to: usize) -> Vec<f32> {
        (from..to).flat_map(|n| [n as f32, -(n as f32)]).collect()
    }

    fn pull_n(ring: &RingAudioBuffer, n: usize) -> (Vec<f32>, Vec<f32>, usize) {
        let mut left = vec![SENTINEL; n];
        let mut right = vec![SENTINEL; n];
        let got = ring.pull(&mut left, &mut right);
        (left, right, got)
    }

    fn assert_invariants(ring: &RingAudioBuffer) {
        let c = ring.cursors();
        let cap = ring.capacity();
        assert!(c.size <= cap);
        assert!(c.start < cap);
        assert!(c.end < cap);
        assert_eq!(c.end, (c.start + c.size) % cap);
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        assert_eq!(RingAudioBuffer::with_capacity(1000, 48_000).capacity(), 1024);
        assert_eq!(RingAudioBuffer::with_capacity(512, 48_000).capacity(), 512);
        assert_eq!(RingAudioBuffer::with_capacity(0, 48_000).capacity(), 1);
        assert_eq!(RingAudioBuffer::for_latency(64, 48_000, 32).capacity(), 4096);
    }

    #[test]
    fn partial_drain_then_underrun_leaves_tail_untouched() {
        let ring = RingAudioBuffer::with_capacity(1024, 48_000);
        assert_eq!(ring.write(&ramp(0, 600)), 600);

        let (left, right, got) = pull_n(&ring, 400);
        assert_eq!(got, 400);
        for (i, (l, r)) in left.iter().zip(&right).enumerate() {
            assert_relative_eq!(*l, i as f32);
            assert_relative_eq!(*r, -(i as f32));
        }

        let (left, _, got) = pull_n(&ring, 400);
        assert_eq!(got, 200);
        for (i, l) in left[..200].iter().enumerate() {
            assert_relative_eq!(*l, (400 + i) as f32);
        }
        assert!(left[200..].iter().all(|s| *s == SENTINEL));
        assert!(ring.is_empty());
    }

    #[test]
    fn overflow_discards_oldest_frames() {
        let ring = RingAudioBuffer::with_capacity(512, 48_000);
        ring.write(&ramp(0, 300));
        ring.write(&ramp(300, 600));

        assert_eq!(ring.len(), 512);
        assert_eq!(ring.discarded_frames(), 88);
        assert_invariants(&ring);

        let (left, _, got) = pull_n(&ring, 512);
        assert_eq!(got, 512);
        let expected: Vec<f32> = (88..600).map(|n| n as f32).collect();
        assert_eq!(left, expected);
    }

    #[test]
    fn oversized_chunk_keeps_only_its_tail() {
        let ring = RingAudioBuffer::with_capacity(256, 48_000);
        ring.write(&ramp(0, 10));
        assert_eq!(ring.write(&ramp(10, 1010)), 1000);

        assert_eq!(ring.len(), 256);
        assert_eq!(ring.discarded_frames(), 1010 - 256);
        assert_invariants(&ring);

        let (left, _, _) = pull_n(&ring, 256);
        assert_relative_eq!(left[0], 754.0);
        assert_relative_eq!(left[255], 1009.0);
    }

    #[test]
    fn wraps_across_the_array_boundary() {
        let ring = RingAudioBuffer::with_capacity(8, 48_000);
        ring.write(&ramp(0, 6));
        pull_n(&ring, 5);
        // start = 5; next write spans slots 6,7,0,1,2
        ring.write(&ramp(6, 11));
        let c = ring.cursors();
        assert_eq!((c.start, c.end, c.size), (5, 3, 6));

        let (left, right, got) = pull_n(&ring, 6);
        assert_eq!(got, 6);
        assert_eq!(left, vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(right, vec![-5.0, -6.0, -7.0, -8.0, -9.0, -10.0]);
    }

    #[test]
    fn writes_within_capacity_round_trip_in_order() {
        let ring = RingAudioBuffer::with_capacity(1024, 44_100);
        let chunks = [17usize, 256, 3, 500, 1, 247];
        let mut next = 0;
        for n in chunks {
            ring.write(&ramp(next, next + n));
            next += n;
        }
        assert_eq!(next, 1024);

        let (left, _, got) = pull_n(&ring, 1024);
        assert_eq!(got, 1024);
        assert!(left.iter().enumerate().all(|(i, l)| *l == i as f32));
        assert_eq!(ring.discarded_frames(), 0);
    }

    #[test]
    fn invariants_hold_across_mixed_traffic() {
        let ring = RingAudioBuffer::with_capacity(64, 48_000);
        let mut seed = 0x2545_f491u32;
        let mut next_rand = move |bound: u32| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed % bound) as usize
        };

        let mut expected_next = 0usize;
        let mut produced = 0usize;
        for _ in 0..2_000 {
            let n = next_rand(90);
            ring.write(&ramp(produced, produced + n));
            produced += n;
            assert_invariants(&ring);

            let (left, _, got) = pull_n(&ring, next_rand(70));
            assert_invariants(&ring);
            // Pulled frames are contiguous and never go backwards.
            for pair in left[..got].windows(2) {
                assert_eq!(pair[1], pair[0] + 1.0);
            }
            if got > 0 {
                assert!(left[0] as usize >= expected_next);
                expected_next = left[got - 1] as usize + 1;
            }
        }
    }

    #[test]
    fn enough_space_tracks_previous_write() {
        let ring = RingAudioBuffer::with_capacity(1024, 48_000);
        assert!(ring.enough_space(), "no prior write");

        ring.write(&ramp(0, 400));
        // 624 free > 400
        assert!(ring.enough_space());

        ring.write(&ramp(400, 800));
        // 224 free <= 400
        assert_eq!(ring.write_available(), 224);
        assert!(!ring.enough_space());

        ring.set_nonblocking(true);
        assert!(ring.enough_space());
        ring.set_nonblocking(false);

        pull_n(&ring, 600);
        assert!(ring.enough_space());
    }

    #[test]
    fn enough_space_is_false_when_last_write_equals_free_space() {
        let ring = RingAudioBuffer::with_capacity(16, 48_000);
        ring.write(&ramp(0, 8));
        assert_eq!(ring.write_available(), 8);
        assert!(!ring.enough_space());
    }

    #[test]
    fn trailing_odd_sample_is_ignored() {
        let ring = RingAudioBuffer::with_capacity(16, 48_000);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0]), 1);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.last_write_size(), 1);
    }

    #[test]
    fn interleaved_pull_fills_first_two_channels() {
        let ring = RingAudioBuffer::with_capacity(16, 48_000);
        ring.write(&ramp(1, 3));

        let mut out = vec![SENTINEL; 4 * 3];
        assert_eq!(ring.pull_interleaved(&mut out, 4), 2);
        assert_eq!(&out[..8], &[1.0, -1.0, SENTINEL, SENTINEL, 2.0, -2.0, SENTINEL, SENTINEL]);
        assert!(out[8..].iter().all(|s| *s == SENTINEL));

        let mut mono = vec![SENTINEL; 4];
        ring.write(&ramp(0, 2));
        assert_eq!(ring.pull_interleaved(&mut mono, 1), 0);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn clear_zeroes_cursors_and_heuristic() {
        let ring = RingAudioBuffer::with_capacity(32, 48_000);
        ring.write(&ramp(0, 40));
        ring.clear();

        assert_eq!(ring.cursors(), Cursors { start: 0, end: 0, size: 0 });
        assert_eq!(ring.last_write_size(), 0);
        assert_eq!(ring.discarded_frames(), 0);
        assert_eq!(ring.write_available(), 32);
    }
}
