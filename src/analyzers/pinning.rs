//! Rolling pinning hot-spot analysis: per-thread and per-stack-trace
//! counters, with a top-10 "hot stacks" view.
//!
//! The stack-trace key space is unbounded in principle (arbitrary runtime
//! stack text), so entries are capped with LRU eviction of the
//! least-recently-seen fingerprint — Design Note 9(b)'s recommended fix for
//! the otherwise-unbounded stack-trace map.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::{VirtualThreadEvent, VirtualThreadEventType};

/// Hard cap on distinct stack-trace fingerprints tracked at once.
const MAX_TRACKED_STACKS: usize = 2048;
const TOP_K: usize = 10;

struct StackEntry {
    count: u64,
    last_seen: u64,
}

struct State {
    per_thread: HashMap<u64, u64>,
    stacks: HashMap<String, StackEntry>,
    access_clock: u64,
    total_duration_nanos: u128,
    total_pinned_events: u64,
}

pub struct PinningAnalyzer {
    state: Mutex<State>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StackHotSpot {
    pub stack_trace: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinningSnapshot {
    pub hot_stacks: Vec<StackHotSpot>,
    pub total_pinned_events: u64,
    pub total_duration_nanos: u128,
    pub mean_duration_nanos: f64,
}

impl PinningAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                per_thread: HashMap::new(),
                stacks: HashMap::new(),
                access_clock: 0,
                total_duration_nanos: 0,
                total_pinned_events: 0,
            }),
        }
    }

    pub fn record(&self, ev: &VirtualThreadEvent) {
        if ev.event_type != VirtualThreadEventType::Pinned {
            return;
        }
        let Some(stack) = ev.stack_trace.as_deref().filter(|s| !s.is_empty()) else {
            return;
        };

        let mut state = self.state.lock();
        *state.per_thread.entry(ev.thread_id).or_insert(0) += 1;
        state.total_duration_nanos += ev.duration as u128;
        state.total_pinned_events += 1;

        let clock = state.access_clock;
        state.access_clock += 1;

        if !state.stacks.contains_key(stack) && state.stacks.len() >= MAX_TRACKED_STACKS {
            if let Some(lru_key) = state
                .stacks
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(k, _)| k.clone())
            {
                state.stacks.remove(&lru_key);
            }
        }

        let entry = state.stacks.entry(stack.to_string()).or_insert(StackEntry { count: 0, last_seen: 0 });
        entry.count += 1;
        entry.last_seen = clock;
    }

    pub fn snapshot(&self) -> PinningSnapshot {
        let state = self.state.lock();

        let mut hot: Vec<StackHotSpot> = state
            .stacks
            .iter()
            .map(|(stack, entry)| StackHotSpot {
                stack_trace: stack.clone(),
                count: entry.count,
            })
            .collect();

        // Descending count, then ascending key for deterministic tie-breaks.
        hot.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stack_trace.cmp(&b.stack_trace)));
        hot.truncate(TOP_K);

        let mean = if state.total_pinned_events > 0 {
            state.total_duration_nanos as f64 / state.total_pinned_events as f64
        } else {
            0.0
        };

        PinningSnapshot {
            hot_stacks: hot,
            total_pinned_events: state.total_pinned_events,
            total_duration_nanos: state.total_duration_nanos,
            mean_duration_nanos: mean,
        }
    }
}

impl Default for PinningAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pinned(thread_id: u64, stack: &str, duration: u64) -> VirtualThreadEvent {
        VirtualThreadEvent::pinned(thread_id, 1, duration, stack.to_string(), Instant::now())
    }

    #[test]
    fn ties_break_on_ascending_key() {
        let analyzer = PinningAnalyzer::new();
        for _ in 0..3 {
            analyzer.record(&pinned(1, "B", 10));
        }
        for _ in 0..3 {
            analyzer.record(&pinned(2, "A", 10));
        }

        let snap = analyzer.snapshot();
        assert_eq!(snap.hot_stacks[0].stack_trace, "A");
        assert_eq!(snap.hot_stacks[1].stack_trace, "B");
    }

    #[test]
    fn tracks_total_duration_and_mean() {
        let analyzer = PinningAnalyzer::new();
        analyzer.record(&pinned(1, "A", 100));
        analyzer.record(&pinned(1, "A", 300));
        let snap = analyzer.snapshot();
        assert_eq!(snap.total_pinned_events, 2);
        assert_eq!(snap.total_duration_nanos, 400);
        assert_eq!(snap.mean_duration_nanos, 200.0);
    }

    #[test]
    fn evicts_least_recently_seen_stack_once_capped() {
        let analyzer = PinningAnalyzer::new();
        for i in 0..(MAX_TRACKED_STACKS + 1) {
            analyzer.record(&pinned(1, &format!("stack-{i}"), 1));
        }
        let state = analyzer.state.lock();
        assert_eq!(state.stacks.len(), MAX_TRACKED_STACKS);
        assert!(!state.stacks.contains_key("stack-0"));
        assert!(state.stacks.contains_key(&format!("stack-{MAX_TRACKED_STACKS}")));
    }

    #[test]
    fn non_pinned_events_are_ignored() {
        let analyzer = PinningAnalyzer::new();
        analyzer.record(&VirtualThreadEvent::start(1, None, Instant::now()));
        let snap = analyzer.snapshot();
        assert_eq!(snap.total_pinned_events, 0);
    }
}
