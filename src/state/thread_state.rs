//! Per-thread finite state machine: RUNNING -> (PINNED?) -> ENDED, with a
//! dirty flag the broadcaster uses to throttle snapshot emission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::events::{VirtualThreadEvent, VirtualThreadEventType};
use crate::serializer::monotonic_marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Running,
    Pinned,
    Ended,
}

#[derive(Debug, Clone)]
pub struct ThreadState {
    pub thread_id: u64,
    pub thread_name: Option<String>,
    pub carrier_thread: Option<u64>,
    pub state: RunState,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub is_pinned: bool,
}

/// `Instant` has no wall-clock meaning, so the wire form encodes `startTime`
/// and `endTime` as the same opaque monotonic markers the VT event
/// serializer uses — `endTime` is present if and only if `state == ENDED`.
impl Serialize for ThreadState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let field_count = 6 + usize::from(self.end_time.is_some());
        let mut s = serializer.serialize_struct("ThreadState", field_count)?;
        s.serialize_field("threadId", &self.thread_id)?;
        s.serialize_field("threadName", &self.thread_name)?;
        s.serialize_field("carrierThread", &self.carrier_thread)?;
        s.serialize_field("state", &self.state)?;
        s.serialize_field("startTime", &monotonic_marker(self.start_time))?;
        if let Some(end_time) = self.end_time {
            s.serialize_field("endTime", &monotonic_marker(end_time))?;
        }
        s.serialize_field("isPinned", &self.is_pinned)?;
        s.end()
    }
}

/// Owns the `threadId -> ThreadState` map. Backed by a `DashMap` so reads
/// (snapshotting for broadcast) and writes (per-event transitions) never
/// contend on a single coarse lock.
pub struct ThreadStateManager {
    threads: DashMap<u64, ThreadState>,
    dirty: AtomicBool,
    retention: Duration,
}

impl ThreadStateManager {
    pub fn new(retention: Duration) -> Self {
        Self {
            threads: DashMap::new(),
            dirty: AtomicBool::new(false),
            retention,
        }
    }

    /// Applies a virtual-thread event to the FSM. Unknown thread ids on a
    /// non-START event are ignored (no retroactive RUNNING entry is
    /// fabricated) per the transition table's `ignored` rows.
    pub fn apply(&self, ev: &VirtualThreadEvent) {
        match ev.event_type {
            VirtualThreadEventType::Start => {
                self.threads.insert(
                    ev.thread_id,
                    ThreadState {
                        thread_id: ev.thread_id,
                        thread_name: ev.thread_name.clone(),
                        carrier_thread: None,
                        state: RunState::Running,
                        start_time: ev.timestamp,
                        end_time: None,
                        is_pinned: false,
                    },
                );
                self.mark_dirty();
            }
            VirtualThreadEventType::Pinned => {
                if let Some(mut entry) = self.threads.get_mut(&ev.thread_id) {
                    if entry.state != RunState::Ended {
                        entry.state = RunState::Pinned;
                        entry.is_pinned = true;
                        if ev.carrier_thread > 0 {
                            entry.carrier_thread = Some(ev.carrier_thread);
                        }
                        self.mark_dirty();
                    }
                }
            }
            VirtualThreadEventType::End => {
                if let Some(mut entry) = self.threads.get_mut(&ev.thread_id) {
                    if entry.state != RunState::Ended {
                        entry.state = RunState::Ended;
                        entry.end_time = Some(Instant::now());
                        self.mark_dirty();
                    }
                }
            }
            VirtualThreadEventType::SubmitFailed => {
                // Doesn't drive the FSM; consumed only by PinningAnalyzer-style
                // analyzers that care about submission failures.
            }
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns whether state has changed since the last call, clearing the
    /// flag atomically (test-and-clear).
    pub fn has_state_changed(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Evicts ENDED entries past the retention window.
    pub fn cleanup(&self) {
        let retention = self.retention;
        self.threads.retain(|_, state| match state.end_time {
            Some(end) => end.elapsed() <= retention,
            None => true,
        });
    }

    pub fn snapshot(&self) -> Vec<ThreadState> {
        self.threads.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
