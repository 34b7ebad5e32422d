//! Event record types published by the runtime's event-source adapter.
//!
//! Every record is `Clone` and carries no borrowed data — the producer must
//! copy any borrowed memory (e.g. a stack-trace string) into the event
//! before calling `RingBuffer::publish`, since the event outlives the call
//! that created it.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualThreadEventType {
    Start,
    End,
    Pinned,
    SubmitFailed,
}

impl VirtualThreadEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            VirtualThreadEventType::Start => "START",
            VirtualThreadEventType::End => "END",
            VirtualThreadEventType::Pinned => "PINNED",
            VirtualThreadEventType::SubmitFailed => "SUBMIT_FAILED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VirtualThreadEvent {
    pub event_type: VirtualThreadEventType,
    pub thread_id: u64,
    pub thread_name: Option<String>,
    /// 0 means "no carrier".
    pub carrier_thread: u64,
    pub timestamp: Instant,
    /// Nanoseconds; meaningful for END/PINNED, 0 otherwise.
    pub duration: u64,
    /// Only populated for PINNED and SUBMIT_FAILED.
    pub stack_trace: Option<String>,
}

impl VirtualThreadEvent {
    pub fn start(thread_id: u64, thread_name: Option<String>, timestamp: Instant) -> Self {
        Self {
            event_type: VirtualThreadEventType::Start,
            thread_id,
            thread_name,
            carrier_thread: 0,
            timestamp,
            duration: 0,
            stack_trace: None,
        }
    }

    pub fn end(thread_id: u64, duration: u64, timestamp: Instant) -> Self {
        Self {
            event_type: VirtualThreadEventType::End,
            thread_id,
            thread_name: None,
            carrier_thread: 0,
            timestamp,
            duration,
            stack_trace: None,
        }
    }

    pub fn pinned(thread_id: u64, carrier_thread: u64, duration: u64, stack_trace: String, timestamp: Instant) -> Self {
        Self {
            event_type: VirtualThreadEventType::Pinned,
            thread_id,
            thread_name: None,
            carrier_thread,
            timestamp,
            duration,
            stack_trace: Some(stack_trace),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcEvent {
    pub timestamp: Instant,
    pub pause_nanos: u64,
    pub collector: String,
    pub cause: String,
    pub heap_before: u64,
    pub heap_after: u64,
}

impl GcEvent {
    /// A pause is "long" at or above 100ms.
    pub const LONG_PAUSE_THRESHOLD_NANOS: u64 = 100_000_000;

    pub fn long_pause(&self) -> bool {
        self.pause_nanos >= Self::LONG_PAUSE_THRESHOLD_NANOS
    }
}

#[derive(Debug, Clone)]
pub struct CpuEvent {
    pub timestamp: Instant,
    /// Fraction in [0, 1].
    pub process_load: f64,
    /// Fraction in [0, 1].
    pub system_load: f64,
    pub thread_cpu_time_nanos: u64,
}

#[derive(Debug, Clone)]
pub struct AllocationEvent {
    pub timestamp: Instant,
    pub thread_id: u64,
    pub class_name: String,
    pub allocation_size: u64,
}
