//! Per-class allocation counts/bytes, a once-per-second byte-rate estimate,
//! and the peak rate observed since process start.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::AllocationEvent;

const TOP_K: usize = 10;
const RATE_WINDOW: std::time::Duration = std::time::Duration::from_secs(1);

struct ClassTotals {
    count: u64,
    bytes: u64,
}

struct State {
    per_class: HashMap<String, ClassTotals>,
    window_start: Instant,
    window_bytes: u64,
    current_rate_bytes_per_sec: f64,
    peak_rate_bytes_per_sec: f64,
}

pub struct AllocationAnalyzer {
    state: Mutex<State>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassHotSpot {
    pub class_name: String,
    pub bytes: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSnapshot {
    pub top_classes: Vec<ClassHotSpot>,
    pub current_rate_bytes_per_sec: f64,
    pub peak_rate_bytes_per_sec: f64,
}

impl AllocationAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                per_class: HashMap::new(),
                window_start: Instant::now(),
                window_bytes: 0,
                current_rate_bytes_per_sec: 0.0,
                peak_rate_bytes_per_sec: 0.0,
            }),
        }
    }

    pub fn record(&self, ev: &AllocationEvent) {
        let mut state = self.state.lock();

        let totals = state.per_class.entry(ev.class_name.clone()).or_insert(ClassTotals { count: 0, bytes: 0 });
        totals.count += 1;
        totals.bytes += ev.allocation_size;

        state.window_bytes += ev.allocation_size;
        let elapsed = state.window_start.elapsed();
        if elapsed >= RATE_WINDOW {
            let rate = state.window_bytes as f64 / elapsed.as_secs_f64();
            state.current_rate_bytes_per_sec = rate;
            if rate > state.peak_rate_bytes_per_sec {
                state.peak_rate_bytes_per_sec = rate;
            }
            state.window_start = Instant::now();
            state.window_bytes = 0;
        }
    }

    pub fn snapshot(&self) -> AllocationSnapshot {
        let state = self.state.lock();

        let mut top: Vec<ClassHotSpot> = state
            .per_class
            .iter()
            .map(|(name, totals)| ClassHotSpot {
                class_name: name.clone(),
                bytes: totals.bytes,
                count: totals.count,
            })
            .collect();
        top.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.class_name.cmp(&b.class_name)));
        top.truncate(TOP_K);

        AllocationSnapshot {
            top_classes: top,
            current_rate_bytes_per_sec: state.current_rate_bytes_per_sec,
            peak_rate_bytes_per_sec: state.peak_rate_bytes_per_sec,
        }
    }
}

impl Default for AllocationAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
