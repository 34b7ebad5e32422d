//! Process-wide counters backing the `/metrics` endpoint. Plain atomics —
//! every counter here is incremented far more often than it's read, so
//! there's no shared lock on the hot path, the same contention trade-off
//! the teacher's atomics sync mode makes for its own per-sensor counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative bucket upper bounds for the subscriber outbound-queue-depth
/// histogram, in the same cumulative-count convention Prometheus histograms
/// use (each bucket counts every sample <= its bound).
const QUEUE_DEPTH_BUCKETS: [usize; 5] = [0, 10, 100, 1_000, usize::MAX];

#[derive(Default)]
pub struct StreamCounters {
    pub events_in: AtomicU64,
    pub dropped: AtomicU64,
}

impl StreamCounters {
    pub fn record_in(&self) {
        self.events_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_dropped(&self, value: u64) {
        self.dropped.store(value, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct Counters {
    pub vt: StreamCounters,
    pub gc: StreamCounters,
    pub cpu: StreamCounters,
    pub allocation: StreamCounters,
    pub events_broadcast: AtomicU64,
    pub subscribers_connected: AtomicU64,
    pub subscribers_dropped_total: AtomicU64,
    /// Per-record analyzer/state-update panics caught and swallowed by the
    /// drain loop's `catch_unwind` isolation.
    pub processing_panics: AtomicU64,
}

impl Counters {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("events_in_vt {}\n", self.vt.events_in.load(Ordering::Relaxed)));
        out.push_str(&format!("events_in_gc {}\n", self.gc.events_in.load(Ordering::Relaxed)));
        out.push_str(&format!("events_in_cpu {}\n", self.cpu.events_in.load(Ordering::Relaxed)));
        out.push_str(&format!(
            "events_in_allocation {}\n",
            self.allocation.events_in.load(Ordering::Relaxed)
        ));
        out.push_str(&format!("dropped_vt {}\n", self.vt.dropped.load(Ordering::Relaxed)));
        out.push_str(&format!("dropped_gc {}\n", self.gc.dropped.load(Ordering::Relaxed)));
        out.push_str(&format!("dropped_cpu {}\n", self.cpu.dropped.load(Ordering::Relaxed)));
        out.push_str(&format!(
            "dropped_allocation {}\n",
            self.allocation.dropped.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "events_broadcast {}\n",
            self.events_broadcast.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "subscribers_connected {}\n",
            self.subscribers_connected.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "subscribers_dropped_total {}\n",
            self.subscribers_dropped_total.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "processing_panics {}\n",
            self.processing_panics.load(Ordering::Relaxed)
        ));
        out
    }

    /// Renders `/metrics` with a cumulative histogram of live subscriber
    /// outbound-queue depths appended, one bucket per upper bound in
    /// `QUEUE_DEPTH_BUCKETS` plus `_sum`/`_count` lines.
    pub fn render_with_queue_depths(&self, depths: &[usize]) -> String {
        let mut out = self.render();
        for bound in QUEUE_DEPTH_BUCKETS {
            let count = depths.iter().filter(|&&d| d <= bound).count();
            let le = if bound == usize::MAX { "+Inf".to_string() } else { bound.to_string() };
            out.push_str(&format!("subscriber_queue_depth_bucket{{le=\"{le}\"}} {count}\n"));
        }
        let sum: usize = depths.iter().sum();
        out.push_str(&format!("subscriber_queue_depth_sum {sum}\n"));
        out.push_str(&format!("subscriber_queue_depth_count {}\n", depths.len()));
        out
    }
}
