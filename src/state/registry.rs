//! Tracks which virtual-thread ids are currently alive, independent of the
//! richer per-thread FSM in `ThreadStateManager`. Used by the carrier
//! analyzer and `/metrics` to report a cheap live-thread count.

use dashmap::DashSet;

pub struct ActiveThreadsRegistry {
    active: DashSet<u64>,
}

impl ActiveThreadsRegistry {
    pub fn new() -> Self {
        Self { active: DashSet::new() }
    }

    pub fn insert(&self, thread_id: u64) {
        self.active.insert(thread_id);
    }

    pub fn remove(&self, thread_id: u64) {
        self.active.remove(&thread_id);
    }

    pub fn count(&self) -> usize {
        self.active.len()
    }

    pub fn contains(&self, thread_id: u64) -> bool {
        self.active.contains(&thread_id)
    }
}

impl Default for ActiveThreadsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
