//! Bounded multi-producer/multi-consumer ring buffer with overwrite-on-full
//! semantics and no lock on the publish path.
//!
//! Slots are addressed by a monotonically increasing sequence number rather
//! than a wrapped index, so a consumer that has fallen behind can detect
//! exactly how many records it missed instead of silently re-reading stale
//! data. The write cursor is claimed via a `compare_exchange` loop (so
//! concurrent publishers still serialize on a single logical cursor without
//! ever blocking each other), and each slot carries its own atomic sequence
//! stamp so a reader can tell "not yet written", "mine to read", and
//! "overwritten since I last looked" apart without taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};

/// Sentinel stamp for a slot that has never been written.
const UNWRITTEN: u64 = u64::MAX;

struct Slot<E> {
    /// Sequence number currently occupying this slot, or `UNWRITTEN`.
    seq: AtomicU64,
    value: ArcSwapOption<E>,
}

struct Inner<E> {
    slots: Box<[Slot<E>]>,
    capacity: u64,
    mask: u64,
    /// Next sequence number a publisher will claim.
    write_cursor: AtomicU64,
    /// Global best-effort overwrite counter: every publish that clobbers a
    /// slot still within the live window increments this, independent of
    /// whether any consumer had read it yet.
    dropped_count: AtomicU64,
    /// Exists only to pair with `not_empty` for blocking wakeups. Never
    /// guards slot data and is never held while publishing — a missed
    /// wakeup just costs a waiting consumer the rest of its poll timeout.
    wake_gate: Mutex<()>,
    not_empty: Condvar,
}

/// Bounded circular buffer of capacity `N` (must be a power of two).
pub struct RingBuffer<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for RingBuffer<E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<E> RingBuffer<E> {
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity.is_power_of_two(), "ring buffer capacity must be a power of two");

        let slots = (0..capacity)
            .map(|_| Slot {
                seq: AtomicU64::new(UNWRITTEN),
                value: ArcSwapOption::from(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            inner: Arc::new(Inner {
                slots,
                capacity: capacity as u64,
                mask: capacity as u64 - 1,
                write_cursor: AtomicU64::new(0),
                dropped_count: AtomicU64::new(0),
                wake_gate: Mutex::new(()),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Never blocks, never fails. Overwrites the oldest unread slot when
    /// full. Concurrent publishers are serialized by a CAS loop on the
    /// write cursor; no lock is taken on this path.
    pub fn publish(&self, e: E) {
        let inner = &self.inner;
        let mut cur = inner.write_cursor.load(Ordering::Relaxed);
        let seq = loop {
            match inner.write_cursor.compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => break cur,
                Err(observed) => cur = observed,
            }
        };

        let idx = (seq & inner.mask) as usize;
        let slot = &inner.slots[idx];
        slot.value.store(Some(Arc::new(e)));
        slot.seq.store(seq, Ordering::Release);

        if seq >= inner.capacity {
            inner.dropped_count.fetch_add(1, Ordering::Relaxed);
        }

        // Best-effort wakeup; parking_lot's Condvar tolerates notifying
        // without holding the paired mutex, and a missed wakeup just delays
        // a waiter until its next spurious check or timeout.
        inner.not_empty.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity as usize
    }

    /// Number of records currently held (not yet overwritten).
    pub fn size(&self) -> usize {
        let written = self.inner.write_cursor.load(Ordering::Acquire);
        written.min(self.inner.capacity) as usize
    }

    /// Best-effort global overwrite counter, independent of any single consumer.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped_count.load(Ordering::Relaxed)
    }

    /// Creates an independent consumer with its own read cursor, starting
    /// at the current tail (it will observe only records published after
    /// this call).
    pub fn create_consumer(&self) -> RingConsumer<E> {
        let cursor = self.inner.write_cursor.load(Ordering::Acquire);
        RingConsumer { inner: self.inner.clone(), cursor, dropped: 0 }
    }

    /// Creates a consumer whose cursor starts at the oldest live record,
    /// so it observes everything still resident in the buffer.
    pub fn create_consumer_from_start(&self) -> RingConsumer<E> {
        let cursor = self.inner.write_cursor.load(Ordering::Acquire).saturating_sub(self.inner.capacity);
        RingConsumer { inner: self.inner.clone(), cursor, dropped: 0 }
    }
}

/// An independent read cursor over a `RingBuffer`.
pub struct RingConsumer<E> {
    inner: Arc<Inner<E>>,
    cursor: u64,
    dropped: u64,
}

impl<E: Clone> RingConsumer<E> {
    /// Returns up to `max` records in publication order; blocks up to
    /// `timeout` if none are yet available, returning an empty vector on
    /// timeout.
    pub fn poll_batch(&mut self, max: usize, timeout: Duration) -> Vec<E> {
        let deadline = Instant::now() + timeout;
        while self.inner.write_cursor.load(Ordering::Acquire) == self.cursor {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            let mut gate = self.inner.wake_gate.lock();
            if self.inner.write_cursor.load(Ordering::Acquire) == self.cursor {
                self.inner.not_empty.wait_for(&mut gate, remaining);
            }
        }

        self.catch_up_cursor();

        let mut out = Vec::with_capacity(max.min(self.inner.capacity as usize));
        while out.len() < max {
            let write_seq = self.inner.write_cursor.load(Ordering::Acquire);
            if self.cursor >= write_seq {
                break;
            }
            let idx = (self.cursor & self.inner.mask) as usize;
            let slot = &self.inner.slots[idx];
            let stamped = slot.seq.load(Ordering::Acquire);
            // Sequence-wrapping-tolerant comparison: `write_cursor` can be
            // visibly ahead of a slot's own `seq` store (they're separate
            // atomics with no ordering edge between them), so "not yet
            // published" must be judged from the slot's own stamp, not from
            // having observed `write_cursor` advance.
            let diff = stamped.wrapping_sub(self.cursor) as i64;
            if diff < 0 {
                // Writer claimed this slot but hasn't stored into it yet.
                break;
            }
            if diff > 0 {
                // Overwritten since we last looked.
                self.dropped += 1;
                self.cursor += 1;
                continue;
            }
            if let Some(value) = &*slot.value.load() {
                out.push((**value).clone());
            }
            self.cursor += 1;
        }
        out
    }

    /// Number of records this consumer has missed due to falling behind.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    fn catch_up_cursor(&mut self) {
        let write_seq = self.inner.write_cursor.load(Ordering::Acquire);
        let oldest_live = write_seq.saturating_sub(self.inner.capacity);
        if self.cursor < oldest_live {
            self.dropped += oldest_live - self.cursor;
            self.cursor = oldest_live;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_consumer_observes_every_record_in_order() {
        let rb: RingBuffer<u32> = RingBuffer::new(8);
        let mut consumer = rb.create_consumer();

        for i in 0..5 {
            rb.publish(i);
        }

        let batch = consumer.poll_batch(10, Duration::from_millis(10));
        assert_eq!(batch, vec![0, 1, 2, 3, 4]);
        assert_eq!(consumer.dropped_count(), 0);
    }

    #[test]
    fn overflow_with_no_consumer_tracks_global_dropped() {
        let rb: RingBuffer<u32> = RingBuffer::new(8);
        for i in 0..20u32 {
            rb.publish(i);
        }
        assert_eq!(rb.dropped_count(), 12);
        assert_eq!(rb.size(), 8);

        let mut consumer = rb.create_consumer_from_start();
        let batch = consumer.poll_batch(8, Duration::from_millis(10));
        assert_eq!(batch, vec![12, 13, 14, 15, 16, 17, 18, 19]);
        assert_eq!(consumer.dropped_count(), 12);
    }

    #[test]
    fn poll_batch_times_out_when_empty() {
        let rb: RingBuffer<u32> = RingBuffer::new(8);
        let mut consumer = rb.create_consumer();
        let start = Instant::now();
        let batch = consumer.poll_batch(4, Duration::from_millis(20));
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn slow_consumer_reports_dropped_records() {
        let rb: RingBuffer<u32> = RingBuffer::new(4);
        let mut consumer = rb.create_consumer();

        for i in 0..4u32 {
            rb.publish(i);
        }
        // consumer hasn't polled yet; publish 4 more, overwriting everything
        for i in 4..8u32 {
            rb.publish(i);
        }

        let batch = consumer.poll_batch(10, Duration::from_millis(10));
        assert_eq!(batch, vec![4, 5, 6, 7]);
        assert_eq!(consumer.dropped_count(), 4);
    }

    #[test]
    fn concurrent_publishers_serialize_without_losing_records() {
        let rb: RingBuffer<u32> = RingBuffer::new(1024);
        let mut consumer = rb.create_consumer();

        std::thread::scope(|scope| {
            for t in 0..4u32 {
                let rb = rb.clone();
                scope.spawn(move || {
                    for i in 0..200u32 {
                        rb.publish(t * 1000 + i);
                    }
                });
            }
        });

        let batch = consumer.poll_batch(1024, Duration::from_millis(50));
        assert_eq!(batch.len(), 800);
        assert_eq!(consumer.dropped_count(), 0);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_capacity() {
        let _rb: RingBuffer<u32> = RingBuffer::new(100);
    }
}
