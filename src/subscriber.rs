//! A connected dashboard peer: its outbound queue, backpressure policy, and
//! `CONNECTING -> REPLAYING -> LIVE -> (DRAINING | STALLED) -> CLOSED`
//! state machine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

const STALL_DROP_THRESHOLD: u64 = 10_000;
const STALL_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Connecting,
    Replaying,
    Live,
    Draining,
    Stalled,
    Closed,
}

/// A subscriber's outbound queue plus its lifecycle state. The broadcaster
/// enqueues into this from the drain loop; the endpoint's write pump drains
/// it into the socket. Neither side ever blocks the other beyond the
/// queue's own capacity.
///
/// The queue itself is a lock-free `ArrayQueue`; `force_push` evicts the
/// oldest frame on overflow instead of rejecting the newest one, matching
/// the teacher's own `ArrayQueue`-backed `SyncMode::LockFree` producer side
/// in spirit (the teacher rejects on full rather than evicting, since its
/// domain tolerates dropping the newest sample, but the type and its
/// lock-free guarantees are the same).
pub struct Subscriber {
    pub id: u64,
    queue: ArrayQueue<String>,
    /// Gate-only mutex paired with `not_empty`; never guards queue data.
    wake_gate: Mutex<()>,
    not_empty: Condvar,
    /// When the queue first became full and stayed that way; used to
    /// detect "queue-full for 5 consecutive seconds".
    full_since: Mutex<Option<Instant>>,
    dropped: AtomicU64,
    state: Mutex<SubscriberState>,
    closed: AtomicBool,
}

pub type SharedSubscriber = Arc<Subscriber>;

impl Subscriber {
    pub fn new(id: u64, capacity: usize) -> SharedSubscriber {
        Arc::new(Self {
            id,
            queue: ArrayQueue::new(capacity),
            wake_gate: Mutex::new(()),
            not_empty: Condvar::new(),
            full_since: Mutex::new(None),
            dropped: AtomicU64::new(0),
            state: Mutex::new(SubscriberState::Connecting),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    pub fn set_state(&self, new_state: SubscriberState) {
        *self.state.lock() = new_state;
    }

    /// Enqueues one outbound frame. On overflow the oldest queued frame is
    /// evicted and `subscriberDropped` increments; the broadcaster never
    /// blocks here.
    pub fn enqueue(&self, frame: String) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(_evicted) = self.queue.force_push(frame) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let mut full_since = self.full_since.lock();
            if full_since.is_none() {
                *full_since = Some(Instant::now());
            }
        } else {
            *self.full_since.lock() = None;
        }
        self.not_empty.notify_one();
    }

    /// Blocks up to `timeout` waiting for a frame; returns `None` on
    /// timeout or once the subscriber has been closed with an empty queue.
    pub fn take(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let mut gate = self.wake_gate.lock();
            if self.queue.is_empty() && !self.closed.load(Ordering::Acquire) {
                self.not_empty.wait_for(&mut gate, remaining);
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current depth of the outbound queue, used by the `/metrics` queue
    /// depth histogram.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Whether this subscriber has crossed the disconnect threshold: too
    /// many total drops, or its queue has stayed full too long.
    pub fn is_stalled(&self) -> bool {
        if self.dropped.load(Ordering::Relaxed) >= STALL_DROP_THRESHOLD {
            return true;
        }
        match *self.full_since.lock() {
            Some(since) => since.elapsed() >= STALL_DURATION,
            None => false,
        }
    }

    /// Releases the subscriber: discards pending frames and wakes any
    /// blocked write pump so it can observe `closed` and exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        while self.queue.pop().is_some() {}
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest_frame() {
        let sub = Subscriber::new(1, 2);
        sub.enqueue("a".into());
        sub.enqueue("b".into());
        sub.enqueue("c".into());
        assert_eq!(sub.dropped_count(), 1);
        assert_eq!(sub.take(Duration::from_millis(10)), Some("b".to_string()));
        assert_eq!(sub.take(Duration::from_millis(10)), Some("c".to_string()));
    }

    #[test]
    fn stalls_after_drop_threshold() {
        let sub = Subscriber::new(1, 1);
        sub.enqueue("seed".into());
        for _ in 0..STALL_DROP_THRESHOLD {
            sub.enqueue("x".into());
        }
        assert!(sub.is_stalled());
    }

    #[test]
    fn close_wakes_blocked_take() {
        let sub = Subscriber::new(1, 4);
        let sub2 = sub.clone();
        let handle = std::thread::spawn(move || sub2.take(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        sub.close();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn state_transitions_are_observable() {
        let sub = Subscriber::new(1, 4);
        assert_eq!(sub.state(), SubscriberState::Connecting);
        sub.set_state(SubscriberState::Replaying);
        sub.set_state(SubscriberState::Live);
        assert_eq!(sub.state(), SubscriberState::Live);
    }

    #[test]
    fn queue_depth_reflects_pending_frames() {
        let sub = Subscriber::new(1, 4);
        sub.enqueue("a".into());
        sub.enqueue("b".into());
        assert_eq!(sub.queue_depth(), 2);
        sub.take(Duration::from_millis(10));
        assert_eq!(sub.queue_depth(), 1);
    }
}
