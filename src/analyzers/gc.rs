//! Rolling GC-pause analysis: totals, per-collector histogram, and a
//! 60-sample pause history for trend display.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::GcEvent;

const HISTORY_LEN: usize = 60;

struct State {
    total_pauses: u64,
    total_paused_nanos: u128,
    long_pause_count: u64,
    per_collector: HashMap<String, u64>,
    pause_history: VecDeque<u64>,
}

pub struct GcAnalyzer {
    state: Mutex<State>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcSnapshot {
    pub total_pauses: u64,
    pub total_paused_nanos: u128,
    pub long_pause_count: u64,
    pub per_collector: Vec<(String, u64)>,
    pub pause_history_nanos: Vec<u64>,
}

impl GcAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                total_pauses: 0,
                total_paused_nanos: 0,
                long_pause_count: 0,
                per_collector: HashMap::new(),
                pause_history: VecDeque::with_capacity(HISTORY_LEN),
            }),
        }
    }

    pub fn record(&self, ev: &GcEvent) {
        let mut state = self.state.lock();
        state.total_pauses += 1;
        state.total_paused_nanos += ev.pause_nanos as u128;
        if ev.long_pause() {
            state.long_pause_count += 1;
        }
        *state.per_collector.entry(ev.collector.clone()).or_insert(0) += 1;

        if state.pause_history.len() >= HISTORY_LEN {
            state.pause_history.pop_front();
        }
        state.pause_history.push_back(ev.pause_nanos);
    }

    pub fn snapshot(&self) -> GcSnapshot {
        let state = self.state.lock();
        let mut per_collector: Vec<(String, u64)> = state.per_collector.iter().map(|(k, v)| (k.clone(), *v)).collect();
        per_collector.sort_by(|a, b| a.0.cmp(&b.0));

        GcSnapshot {
            total_pauses: state.total_pauses,
            total_paused_nanos: state.total_paused_nanos,
            long_pause_count: state.long_pause_count,
            per_collector,
            pause_history_nanos: state.pause_history.iter().copied().collect(),
        }
    }
}

impl Default for GcAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
