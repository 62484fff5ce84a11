// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lane: a bounded, fixed-slot ring buffer carrying one class of traffic.
//!
//! Head and tail are independent atomic counters, each isolated on its own
//! 64-byte cache line (spec §5: "Head and tail MUST live on separate cache
//! lines"). `submit` reserves a slot via `fetch_add` on `head` (supporting
//! multi-producer); `drain` reserves via a compare-exchange loop on `tail`
//! bounded by the current `head` (supporting multi-consumer, since an
//! unconditional `fetch_add` could advance `tail` past `head` and drop a
//! not-yet-submitted slot). Single-producer/single-consumer is the common
//! case; multi-producer/multi-consumer is supported through the same
//! atomics without any additional locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use super::slot::{read_slot, write_slot, LEN_PREFIX_BYTES};

/// Traffic class carried by a [`Lane`]; determines its defaults (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Small, ultra-low-latency messages.
    Express,
    /// Large, throughput-oriented messages.
    Bulk,
    /// Latency-critical messages that must jump the queue.
    Priority,
    /// Steady-rate medium-size messages.
    Streaming,
}

impl LaneKind {
    /// All lane kinds, in the declaration order `LaneManager` indexes by.
    pub const ALL: [LaneKind; 4] = [
        LaneKind::Express,
        LaneKind::Bulk,
        LaneKind::Priority,
        LaneKind::Streaming,
    ];

    /// Ring capacity (slot count) for this lane kind (spec §3 defaults table).
    #[must_use]
    pub fn default_capacity(self) -> usize {
        match self {
            LaneKind::Express => 1024,
            LaneKind::Bulk => 8192,
            LaneKind::Priority => 512,
            LaneKind::Streaming => 16384,
        }
    }

    /// Slot size in bytes for this lane kind (spec §3 defaults table).
    #[must_use]
    pub fn default_slot_size(self) -> usize {
        match self {
            LaneKind::Express => 256,
            LaneKind::Bulk => 65536,
            LaneKind::Priority => 1024,
            LaneKind::Streaming => 4096,
        }
    }

    /// Priority weight used by callers to prioritize lane draining.
    #[must_use]
    pub fn priority_weight(self) -> u32 {
        match self {
            LaneKind::Express => 4,
            LaneKind::Bulk => 1,
            LaneKind::Priority => 8,
            LaneKind::Streaming => 2,
        }
    }

    /// Target one-way latency in microseconds for this lane kind.
    #[must_use]
    pub fn latency_target_us(self) -> f64 {
        match self {
            LaneKind::Express => 1.0,
            LaneKind::Bulk => 100.0,
            LaneKind::Priority => 0.5,
            LaneKind::Streaming => 50.0,
        }
    }
}

/// A 64-byte-aligned atomic. `size_of` is padded to 64 bytes by the compiler
/// (size is always a multiple of alignment), which is what isolates `head`
/// and `tail` onto separate cache lines when they are adjacent struct
/// fields.
#[repr(align(64))]
#[derive(Debug, Default)]
struct PaddedAtomic(AtomicU64);

/// A point-in-time, plain-data copy of a lane's counters, safe to hand to
/// callers without exposing the live atomics (spec §3 extension, see
/// SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneSnapshot {
    pub kind_index: usize,
    pub capacity: usize,
    pub slot_size: usize,
    pub message_count: u64,
    pub bytes_transferred: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub avg_latency_us: f64,
    pub max_latency_us: f64,
    pub p99_latency_us: f64,
    pub congestion_events: u64,
    pub messages_per_sec: f64,
    pub bytes_per_sec: f64,
}

/// A bounded ring buffer of fixed-size slots carrying one [`LaneKind`] of
/// traffic (spec §4.1).
pub struct Lane {
    kind: LaneKind,
    capacity: usize,
    mask: Option<usize>,
    slot_size: usize,
    // UnsafeCell: slots are written/read through shared `&self` once a
    // producer/consumer has exclusively reserved an index via fetch_add on
    // head/tail, mirroring the reference SHM ring's `ShmSlot` payload cell.
    buffer: std::cell::UnsafeCell<Box<[u8]>>,
    head: PaddedAtomic,
    tail: PaddedAtomic,

    bytes_transferred: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
    congestion_events: AtomicU64,
    avg_latency_bits: AtomicU64,
    max_latency_bits: AtomicU64,

    latency_target_us: f64,
    busy_wait_multiplier: f64,

    // Sliding-window rate sampling (spec §4.1 "Metric rates").
    prev_sample: Mutex<(Instant, u64, u64)>,
}

// SAFETY: the `UnsafeCell<Box<[u8]>>` buffer is only ever accessed through
// index ranges exclusively reserved via atomic fetch_add on `head` or
// compare-exchange on `tail`; no two callers ever dereference the same slot
// range concurrently as long as the `head - tail <= capacity` invariant
// holds (enforced by `submit`'s busy-wait). This mirrors `ShmSlot`'s
// `unsafe impl Send + Sync` rationale in the shared-memory transport this
// design is grounded on.
unsafe impl Sync for Lane {}

impl Lane {
    /// Construct a lane with the given kind's default capacity/slot size.
    #[must_use]
    pub fn new(kind: LaneKind, busy_wait_multiplier: f64) -> Self {
        Self::with_capacity(
            kind,
            kind.default_capacity(),
            kind.default_slot_size(),
            busy_wait_multiplier,
        )
    }

    /// Construct a lane with an explicit capacity/slot size override.
    #[must_use]
    pub fn with_capacity(
        kind: LaneKind,
        capacity: usize,
        slot_size: usize,
        busy_wait_multiplier: f64,
    ) -> Self {
        assert!(capacity > 0, "lane capacity must be non-zero");
        assert!(
            slot_size > LEN_PREFIX_BYTES,
            "slot_size must exceed the length prefix"
        );
        let mask = capacity.is_power_of_two().then_some(capacity - 1);
        let buffer = vec![0u8; capacity * slot_size].into_boxed_slice();
        Self {
            kind,
            capacity,
            mask,
            slot_size,
            buffer: std::cell::UnsafeCell::new(buffer),
            head: PaddedAtomic::default(),
            tail: PaddedAtomic::default(),
            bytes_transferred: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            congestion_events: AtomicU64::new(0),
            avg_latency_bits: AtomicU64::new(0),
            max_latency_bits: AtomicU64::new(0),
            latency_target_us: kind.latency_target_us(),
            busy_wait_multiplier,
            prev_sample: Mutex::new((Instant::now(), 0, 0)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> LaneKind {
        self.kind
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    fn index_of(&self, counter: u64) -> usize {
        match self.mask {
            Some(mask) => (counter as usize) & mask,
            None => (counter as usize) % self.capacity,
        }
    }

    #[inline]
    fn slot_mut(&self, index: usize) -> &mut [u8] {
        let start = index * self.slot_size;
        // SAFETY: each reserved index is exclusive to the producer/consumer
        // that reserved it via fetch_add on head or compare-exchange on
        // tail; no two producers (or a producer and consumer within
        // capacity) ever hold the same index concurrently as long as
        // `head - tail <= capacity` (spec invariant).
        unsafe {
            let base = (*self.buffer.get()).as_mut_ptr();
            std::slice::from_raw_parts_mut(base.add(start), self.slot_size)
        }
    }

    #[inline]
    fn slot(&self, index: usize) -> &[u8] {
        let start = index * self.slot_size;
        // SAFETY: see `slot_mut`; readers only ever read an index the
        // consumer side has exclusively reserved via compare-exchange on
        // tail.
        unsafe {
            let base = (*self.buffer.get()).as_ptr();
            std::slice::from_raw_parts(base.add(start), self.slot_size)
        }
    }

    fn record_latency(&self, elapsed_us: f64) {
        let prev_bits = self.avg_latency_bits.load(Ordering::Relaxed);
        let new_avg = if prev_bits == 0 {
            elapsed_us
        } else {
            let prev = f64::from_bits(prev_bits);
            0.9 * prev + 0.1 * elapsed_us
        };
        self.avg_latency_bits
            .store(new_avg.to_bits(), Ordering::Relaxed);

        let prev_max_bits = self.max_latency_bits.load(Ordering::Relaxed);
        let prev_max = f64::from_bits(prev_max_bits);
        if elapsed_us > prev_max {
            self.max_latency_bits
                .store(elapsed_us.to_bits(), Ordering::Relaxed);
        }

        if elapsed_us > 2.0 * self.latency_target_us {
            self.congestion_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Submit `data` onto this lane. Returns `false` if the lane stays full
    /// past the busy-wait deadline (spec §4.1 step 3).
    ///
    /// # Panics
    /// Panics if `data.len() > slot_size - 4` (precondition, spec §4.1).
    pub fn submit(&self, data: &[u8], _priority: u32) -> bool {
        assert!(
            data.len() <= self.slot_size - LEN_PREFIX_BYTES,
            "payload exceeds lane slot capacity"
        );

        let t0 = Instant::now();
        let i = self.head.0.fetch_add(1, Ordering::AcqRel);

        let deadline_us = self.busy_wait_multiplier * self.latency_target_us;
        loop {
            let tail = self.tail.0.load(Ordering::Acquire);
            if i - tail < self.capacity as u64 {
                break;
            }
            if t0.elapsed().as_micros() as f64 > deadline_us {
                log::warn!(
                    "lane[{:?}] submit timed out waiting for space (capacity={})",
                    self.kind,
                    self.capacity
                );
                return false;
            }
            std::hint::spin_loop();
        }

        let index = self.index_of(i);
        write_slot(self.slot_mut(index), data);

        self.bytes_transferred
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.total_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        self.record_latency(t0.elapsed().as_micros() as f64);
        true
    }

    /// Pop the oldest message, if any. Never blocks (spec §4.1). Safe under
    /// concurrent consumers: the tail index is reserved via a
    /// compare-exchange loop before the slot is read, so no two `drain`
    /// calls ever read the same slot or skip an unread one.
    pub fn drain(&self) -> Option<(Vec<u8>, u32)> {
        let mut tail = self.tail.0.load(Ordering::Acquire);
        loop {
            let head = self.head.0.load(Ordering::Acquire);
            if tail >= head {
                return None;
            }
            match self.tail.0.compare_exchange_weak(
                tail,
                tail + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => tail = actual,
            }
        }

        let index = self.index_of(tail);
        let payload = read_slot(self.slot(index));
        payload.map(|p| (p, self.kind.priority_weight()))
    }

    /// Messages currently queued (`head - tail`).
    #[must_use]
    pub fn message_count(&self) -> u64 {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    /// Snapshot of this lane's counters, including the sliding-window rate
    /// (spec §4.1 "Metric rates").
    pub fn get_metrics(&self) -> LaneSnapshot {
        let total_messages = self.total_messages.load(Ordering::Relaxed);
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        let avg_latency_us = f64::from_bits(self.avg_latency_bits.load(Ordering::Relaxed));
        let max_latency_us = f64::from_bits(self.max_latency_bits.load(Ordering::Relaxed));

        let mut prev = self.prev_sample.lock();
        let (prev_time, prev_messages, prev_bytes) = *prev;
        let elapsed = prev_time.elapsed().as_secs_f64().max(f64::EPSILON);
        let messages_per_sec = (total_messages.saturating_sub(prev_messages)) as f64 / elapsed;
        let bytes_per_sec = (total_bytes.saturating_sub(prev_bytes)) as f64 / elapsed;
        *prev = (Instant::now(), total_messages, total_bytes);
        drop(prev);

        LaneSnapshot {
            kind_index: LaneKind::ALL.iter().position(|k| *k == self.kind).unwrap_or(0),
            capacity: self.capacity,
            slot_size: self.slot_size,
            message_count: self.message_count(),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            total_messages,
            total_bytes,
            avg_latency_us,
            max_latency_us,
            // Documented approximation, not a real quantile (spec §9, Open
            // Question 5).
            p99_latency_us: 0.99 * max_latency_us,
            congestion_events: self.congestion_events.load(Ordering::Relaxed),
            messages_per_sec,
            bytes_per_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        assert_eq!(LaneKind::Express.default_capacity(), 1024);
        assert_eq!(LaneKind::Express.default_slot_size(), 256);
        assert_eq!(LaneKind::Bulk.default_capacity(), 8192);
        assert_eq!(LaneKind::Bulk.default_slot_size(), 65536);
        assert_eq!(LaneKind::Priority.default_capacity(), 512);
        assert_eq!(LaneKind::Priority.default_slot_size(), 1024);
        assert_eq!(LaneKind::Streaming.default_capacity(), 16384);
        assert_eq!(LaneKind::Streaming.default_slot_size(), 4096);
    }

    #[test]
    fn head_tail_are_cache_line_isolated() {
        assert_eq!(std::mem::size_of::<PaddedAtomic>(), 64);
        assert_eq!(std::mem::align_of::<PaddedAtomic>(), 64);
    }

    // Scenario S2 from spec §8: 10-message round trip on a STREAMING lane.
    #[test]
    fn ring_round_trip_preserves_order() {
        let lane = Lane::new(LaneKind::Streaming, 2.0);
        for i in 0..10 {
            let msg = format!("hello_{i}");
            assert!(lane.submit(msg.as_bytes(), 2));
        }
        for i in 0..10 {
            let (payload, priority) = lane.drain().expect("message should be present");
            assert_eq!(payload, format!("hello_{i}").into_bytes());
            assert_eq!(priority, LaneKind::Streaming.priority_weight());
        }
        assert!(lane.drain().is_none());
    }

    #[test]
    fn bounded_occupancy_holds() {
        let lane = Lane::with_capacity(LaneKind::Express, 4, 64, 0.001);
        for _ in 0..4 {
            assert!(lane.submit(b"x", 0));
        }
        assert_eq!(lane.message_count(), 4);
        // Lane is full: submit should busy-wait then give up quickly given
        // the tiny multiplier, returning false without corrupting state.
        assert!(!lane.submit(b"y", 0));
        assert_eq!(lane.message_count(), 4);
    }

    #[test]
    fn drain_then_submit_reuses_slot() {
        let lane = Lane::with_capacity(LaneKind::Express, 2, 64, 2.0);
        assert!(lane.submit(b"a", 0));
        assert!(lane.submit(b"b", 0));
        assert_eq!(lane.drain().unwrap().0, b"a");
        assert!(lane.submit(b"c", 0));
        assert_eq!(lane.drain().unwrap().0, b"b");
        assert_eq!(lane.drain().unwrap().0, b"c");
    }

    #[test]
    #[should_panic(expected = "payload exceeds lane slot capacity")]
    fn oversize_payload_panics() {
        let lane = Lane::with_capacity(LaneKind::Express, 4, 16, 2.0);
        lane.submit(&[0u8; 20], 0);
    }

    #[test]
    fn metrics_track_totals() {
        let lane = Lane::new(LaneKind::Express, 2.0);
        lane.submit(b"hi", 0);
        lane.submit(b"there", 0);
        let snap = lane.get_metrics();
        assert_eq!(snap.total_messages, 2);
        assert_eq!(snap.total_bytes, 7);
        assert_eq!(snap.bytes_transferred, 7);
    }

    #[test]
    fn concurrent_producers_preserve_no_loss() {
        use std::sync::Arc;
        use std::thread;

        let lane = Arc::new(Lane::with_capacity(LaneKind::Express, 1024, 64, 2.0));
        let mut handles = Vec::new();
        for t in 0..4 {
            let lane = Arc::clone(&lane);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let msg = format!("t{t}-{i}");
                    assert!(lane.submit(msg.as_bytes(), 0));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut drained = 0;
        while lane.drain().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 400);
    }

    #[test]
    fn concurrent_consumers_drain_each_message_exactly_once() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;
        use std::thread;

        let lane = Arc::new(Lane::with_capacity(LaneKind::Express, 1024, 64, 2.0));
        for i in 0..400 {
            assert!(lane.submit(format!("m{i}").as_bytes(), 0));
        }

        let drained = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lane = Arc::clone(&lane);
            let drained = Arc::clone(&drained);
            handles.push(thread::spawn(move || {
                while lane.drain().is_some() {
                    drained.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(drained.load(Ordering::Relaxed), 400);
        assert!(lane.drain().is_none());
    }
}
