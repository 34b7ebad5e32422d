//! Keeps the last 60 CPU samples and exposes mean/peak load over the
//! window.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::CpuEvent;

const HISTORY_LEN: usize = 60;

#[derive(Clone, Copy)]
struct Sample {
    process_load: f64,
    system_load: f64,
}

struct State {
    history: VecDeque<Sample>,
}

pub struct CpuAnalyzer {
    state: Mutex<State>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSnapshot {
    pub mean_process_load: f64,
    pub peak_process_load: f64,
    pub mean_system_load: f64,
    pub peak_system_load: f64,
    pub process_load_history: Vec<f64>,
    pub system_load_history: Vec<f64>,
}

impl CpuAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                history: VecDeque::with_capacity(HISTORY_LEN),
            }),
        }
    }

    pub fn record(&self, ev: &CpuEvent) {
        let mut state = self.state.lock();
        if state.history.len() >= HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(Sample {
            process_load: ev.process_load,
            system_load: ev.system_load,
        });
    }

    pub fn snapshot(&self) -> CpuSnapshot {
        let state = self.state.lock();
        let n = state.history.len().max(1) as f64;

        let (mean_p, peak_p) = state.history.iter().fold((0.0, f64::MIN), |(sum, peak), s| {
            (sum + s.process_load, peak.max(s.process_load))
        });
        let (mean_s, peak_s) = state.history.iter().fold((0.0, f64::MIN), |(sum, peak), s| {
            (sum + s.system_load, peak.max(s.system_load))
        });

        CpuSnapshot {
            mean_process_load: if state.history.is_empty() { 0.0 } else { mean_p / n },
            peak_process_load: if state.history.is_empty() { 0.0 } else { peak_p },
            mean_system_load: if state.history.is_empty() { 0.0 } else { mean_s / n },
            peak_system_load: if state.history.is_empty() { 0.0 } else { peak_s },
            process_load_history: state.history.iter().map(|s| s.process_load).collect(),
            system_load_history: state.history.iter().map(|s| s.system_load).collect(),
        }
    }
}

impl Default for CpuAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
