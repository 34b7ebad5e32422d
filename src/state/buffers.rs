//! Bounded secondary buffers with eviction: the replay buffer handed to
//! freshly connected subscribers, and the per-thread history served by the
//! `get-thread-events` command.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Bounded FIFO of the most recently serialized frames, replayed in
/// insertion order to any subscriber that connects.
pub struct RecentEventsBuffer {
    frames: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RecentEventsBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, frame: String) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Snapshot taken atomically with respect to concurrent pushes, for
    /// replay to a newly connected subscriber.
    pub fn snapshot(&self) -> Vec<String> {
        self.frames.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

/// `threadId -> bounded FIFO of serialized frames`, capped at
/// `max_threads` distinct threads. When the cap is exceeded, the
/// least-recently-added thread is evicted — a deterministic replacement
/// for the "first iteration entry" policy the design notes flag as
/// non-deterministic in a plain concurrent map.
pub struct ThreadEventsBuffer {
    per_thread: DashMap<u64, VecDeque<String>>,
    insertion_order: Mutex<VecDeque<u64>>,
    per_thread_capacity: usize,
    max_threads: usize,
}

impl ThreadEventsBuffer {
    pub fn new(per_thread_capacity: usize, max_threads: usize) -> Self {
        Self {
            per_thread: DashMap::new(),
            insertion_order: Mutex::new(VecDeque::new()),
            per_thread_capacity,
            max_threads,
        }
    }

    pub fn push(&self, thread_id: u64, frame: String) {
        let is_new = !self.per_thread.contains_key(&thread_id);
        if is_new {
            self.evict_if_needed();
        }

        let mut entry = self.per_thread.entry(thread_id).or_insert_with(VecDeque::new);
        if entry.len() >= self.per_thread_capacity {
            entry.pop_front();
        }
        entry.push_back(frame);
        drop(entry);

        if is_new {
            self.insertion_order.lock().push_back(thread_id);
        }
    }

    fn evict_if_needed(&self) {
        if self.per_thread.len() < self.max_threads {
            return;
        }
        let mut order = self.insertion_order.lock();
        while self.per_thread.len() >= self.max_threads {
            match order.pop_front() {
                Some(oldest) => {
                    self.per_thread.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, thread_id: u64) -> Vec<String> {
        self.per_thread
            .get(&thread_id)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn thread_count(&self) -> usize {
        self.per_thread.len()
    }

    #[cfg(test)]
    fn snapshot_lengths(&self) -> HashMap<u64, usize> {
        self.per_thread.iter().map(|e| (*e.key(), e.value().len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_events_buffer_caps_at_capacity() {
        let buf = RecentEventsBuffer::new(3);
        for i in 0..5 {
            buf.push(format!("E{i}"));
        }
        assert_eq!(buf.snapshot(), vec!["E2", "E3", "E4"]);
    }

    #[test]
    fn per_thread_buffer_caps_entries_per_thread() {
        let buf = ThreadEventsBuffer::new(2, 10);
        buf.push(1, "a".into());
        buf.push(1, "b".into());
        buf.push(1, "c".into());
        assert_eq!(buf.get(1), vec!["b", "c"]);
    }

    #[test]
    fn evicts_least_recently_added_thread_when_over_capacity() {
        let buf = ThreadEventsBuffer::new(10, 2);
        buf.push(1, "a".into());
        buf.push(2, "b".into());
        assert_eq!(buf.thread_count(), 2);
        buf.push(3, "c".into());
        assert_eq!(buf.thread_count(), 2);
        assert!(buf.get(1).is_empty());
        assert_eq!(buf.get(2), vec!["b"]);
        assert_eq!(buf.get(3), vec!["c"]);
        let _ = buf.snapshot_lengths();
    }
}
