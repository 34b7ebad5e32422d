//! Carrier-thread saturation: how many virtual threads each carrier is
//! currently hosting, relative to the busiest it has been recently.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

use crate::events::{VirtualThreadEvent, VirtualThreadEventType};

const WINDOW: usize = 60;

struct CarrierState {
    active: u64,
    total_hosted: u64,
    recent_active: VecDeque<u64>,
}

impl CarrierState {
    fn new() -> Self {
        Self {
            active: 0,
            total_hosted: 0,
            recent_active: VecDeque::with_capacity(WINDOW),
        }
    }

    fn record_active_sample(&mut self) {
        if self.recent_active.len() >= WINDOW {
            self.recent_active.pop_front();
        }
        self.recent_active.push_back(self.active);
    }

    fn saturation(&self) -> f64 {
        let max_active = self.recent_active.iter().copied().max().unwrap_or(0).max(1);
        self.active as f64 / max_active as f64
    }
}

struct State {
    carriers: HashMap<u64, CarrierState>,
    /// Which carrier a given virtual thread is currently hosted on, so an
    /// END (which carries no carrier info of its own) can find the right
    /// carrier to decrement.
    thread_carrier: HashMap<u64, u64>,
}

pub struct CarrierThreadAnalyzer {
    state: Mutex<State>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarrierSnapshot {
    pub carrier_id: u64,
    pub active: u64,
    pub total_hosted: u64,
    pub saturation: f64,
}

impl CarrierThreadAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                carriers: HashMap::new(),
                thread_carrier: HashMap::new(),
            }),
        }
    }

    pub fn record(&self, ev: &VirtualThreadEvent) {
        let mut state = self.state.lock();
        match ev.event_type {
            VirtualThreadEventType::Start => {
                if ev.carrier_thread > 0 {
                    self.assign(&mut state, ev.thread_id, ev.carrier_thread);
                }
            }
            VirtualThreadEventType::Pinned => {
                if ev.carrier_thread > 0 {
                    self.assign(&mut state, ev.thread_id, ev.carrier_thread);
                }
            }
            VirtualThreadEventType::End => {
                if let Some(carrier_id) = state.thread_carrier.remove(&ev.thread_id) {
                    if let Some(carrier) = state.carriers.get_mut(&carrier_id) {
                        carrier.active = carrier.active.saturating_sub(1);
                        carrier.record_active_sample();
                    }
                }
            }
            VirtualThreadEventType::SubmitFailed => {}
        }
    }

    fn assign(&self, state: &mut State, thread_id: u64, carrier_id: u64) {
        let previous = state.thread_carrier.insert(thread_id, carrier_id);
        if previous == Some(carrier_id) {
            return; // already accounted for on this carrier
        }
        if let Some(prev_id) = previous {
            if let Some(prev_carrier) = state.carriers.get_mut(&prev_id) {
                prev_carrier.active = prev_carrier.active.saturating_sub(1);
                prev_carrier.record_active_sample();
            }
        }
        let carrier = state.carriers.entry(carrier_id).or_insert_with(CarrierState::new);
        carrier.active += 1;
        carrier.total_hosted += 1;
        carrier.record_active_sample();
    }

    pub fn snapshot(&self) -> Vec<CarrierSnapshot> {
        let state = self.state.lock();
        let mut out: Vec<CarrierSnapshot> = state
            .carriers
            .iter()
            .map(|(id, c)| CarrierSnapshot {
                carrier_id: *id,
                active: c.active,
                total_hosted: c.total_hosted,
                saturation: c.saturation(),
            })
            .collect();
        out.sort_by_key(|c| c.carrier_id);
        out
    }
}

impl Default for CarrierThreadAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
