//! Integration tests exercising the real ring buffer -> broadcaster ->
//! subscriber pipeline together, as opposed to the unit tests alongside
//! each module that exercise one component in isolation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use argus::analyzers::{AllocationAnalyzer, CarrierThreadAnalyzer, CpuAnalyzer, GcAnalyzer, PinningAnalyzer};
use argus::broadcaster::{Analyzers, EventBroadcaster};
use argus::events::{AllocationEvent, CpuEvent, GcEvent, VirtualThreadEvent};
use argus::metrics::Counters;
use argus::ring_buffer::RingBuffer;
use argus::state::{ActiveThreadsRegistry, RecentEventsBuffer, ThreadEventsBuffer, ThreadStateManager};

fn analyzers() -> Arc<Analyzers> {
    Arc::new(Analyzers {
        pinning: PinningAnalyzer::new(),
        carrier: CarrierThreadAnalyzer::new(),
        gc: GcAnalyzer::new(),
        cpu: CpuAnalyzer::new(),
        allocation: AllocationAnalyzer::new(),
    })
}

/// Drains `sub` until a frame matching `predicate` is seen or `budget`
/// elapses, returning the parsed frame.
fn wait_for_frame(sub: &argus::subscriber::SharedSubscriber, budget: Duration, predicate: impl Fn(&Value) -> bool) -> Option<Value> {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(frame) = sub.take(remaining.min(Duration::from_millis(200))) {
            if let Ok(v) = serde_json::from_str::<Value>(&frame) {
                if predicate(&v) {
                    return Some(v);
                }
            }
        }
    }
    None
}

#[test]
fn lifecycle_snapshot_reflects_ended_state_then_is_evicted_after_retention() {
    let vt: RingBuffer<VirtualThreadEvent> = RingBuffer::new(64);
    let broadcaster = EventBroadcaster::new(
        &vt,
        None,
        None,
        None,
        Arc::new(ActiveThreadsRegistry::new()),
        // Short retention so the test doesn't need to wait out the real 5s window.
        Arc::new(ThreadStateManager::new(Duration::from_millis(200))),
        Arc::new(RecentEventsBuffer::new(100)),
        Arc::new(ThreadEventsBuffer::new(100, 1000)),
        analyzers(),
        Arc::new(Counters::default()),
        16,
    );
    let _handle = broadcaster.spawn();

    let (sub, _replay) = broadcaster.register_subscriber();

    let t0 = Instant::now();
    vt.publish(VirtualThreadEvent::start(7, Some("w".into()), t0));
    vt.publish(VirtualThreadEvent::pinned(7, 3, 100_000_000, "S".into(), t0));
    vt.publish(VirtualThreadEvent::end(7, 200_000_000, t0));

    let snapshot = wait_for_frame(&sub, Duration::from_secs(2), |v| {
        v["type"] == "thread-state" && v["threads"].as_array().map(|a| !a.is_empty()).unwrap_or(false)
    })
    .expect("expected a thread-state snapshot containing tid 7");

    let entry = snapshot["threads"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["threadId"] == 7)
        .expect("tid 7 present in snapshot while within retention window");
    assert_eq!(entry["state"], "ENDED");
    assert_eq!(entry["isPinned"], true);
    let start_time = entry["startTime"].as_u64().expect("startTime present on wire");
    let end_time = entry["endTime"].as_u64().expect("endTime present once state is ENDED");
    assert!(end_time >= start_time);

    // Wait past retention plus a cleanup tick, then a freshly connected
    // subscriber's next snapshot should no longer carry tid 7.
    std::thread::sleep(Duration::from_millis(300));
    let (sub2, _replay2) = broadcaster.register_subscriber();
    let snapshot2 = wait_for_frame(&sub2, Duration::from_secs(2), |v| v["type"] == "thread-state");
    if let Some(v) = snapshot2 {
        assert!(v["threads"].as_array().unwrap().iter().all(|t| t["threadId"] != 7));
    }

    broadcaster.stop();
}

#[test]
fn pinning_topk_tie_break_is_deterministic_through_the_full_pipeline() {
    let vt: RingBuffer<VirtualThreadEvent> = RingBuffer::new(64);
    let broadcaster = EventBroadcaster::new(
        &vt,
        None,
        None,
        None,
        Arc::new(ActiveThreadsRegistry::new()),
        Arc::new(ThreadStateManager::new(Duration::from_millis(200))),
        Arc::new(RecentEventsBuffer::new(100)),
        Arc::new(ThreadEventsBuffer::new(100, 1000)),
        analyzers(),
        Arc::new(Counters::default()),
        16,
    );
    let _handle = broadcaster.spawn();
    let (sub, _replay) = broadcaster.register_subscriber();

    for _ in 0..3 {
        vt.publish(VirtualThreadEvent::pinned(1, 1, 10, "B".into(), Instant::now()));
    }
    for _ in 0..3 {
        vt.publish(VirtualThreadEvent::pinned(2, 1, 10, "A".into(), Instant::now()));
    }

    let snapshot = wait_for_frame(&sub, Duration::from_secs(3), |v| v["type"] == "pinning-analysis")
        .expect("expected a pinning-analysis snapshot within the 1s analyzer tick");

    let hot = snapshot["hotStacks"].as_array().expect("pinning-analysis frame carries a hot-stacks list");
    assert!(hot.len() >= 2);
    let stacks: Vec<&str> = hot.iter().filter_map(|e| e["stackTrace"].as_str()).collect();
    let pos_a = stacks.iter().position(|s| *s == "A").expect("A present");
    let pos_b = stacks.iter().position(|s| *s == "B").expect("B present");
    assert!(pos_a < pos_b, "ascending-key tie-break should place A before B, got {stacks:?}");

    broadcaster.stop();
}

#[test]
fn fast_subscriber_keeps_pace_while_slow_subscriber_is_stalled() {
    let vt: RingBuffer<VirtualThreadEvent> = RingBuffer::new(64);
    let broadcaster = EventBroadcaster::new(
        &vt,
        None,
        None,
        None,
        Arc::new(ActiveThreadsRegistry::new()),
        Arc::new(ThreadStateManager::new(Duration::from_millis(200))),
        Arc::new(RecentEventsBuffer::new(100)),
        Arc::new(ThreadEventsBuffer::new(100, 1000)),
        analyzers(),
        Arc::new(Counters::default()),
        // A tiny queue capacity makes the slow subscriber cross the drop
        // threshold after far fewer than 10_000 broadcast frames.
        4,
    );

    let (slow, _) = broadcaster.register_subscriber();
    let (fast, _) = broadcaster.register_subscriber();

    let reader = {
        let fast = fast.clone();
        std::thread::spawn(move || {
            let mut received = Vec::new();
            loop {
                match fast.take(Duration::from_secs(2)) {
                    Some(frame) if frame == "DONE" => break,
                    Some(frame) => received.push(frame),
                    None => break,
                }
            }
            received
        })
    };

    const TOTAL: usize = 10_010;
    for i in 0..TOTAL {
        broadcaster.broadcast_frame(format!("frame-{i}"));
    }
    broadcaster.broadcast_frame("DONE".to_string());

    let received = reader.join().unwrap();
    assert_eq!(received.len(), TOTAL);
    for (i, frame) in received.iter().enumerate() {
        assert_eq!(frame, &format!("frame-{i}"));
    }

    assert!(slow.is_stalled(), "slow subscriber should have crossed the 10_000-drop stall threshold");
}

#[test]
fn replay_buffer_sends_only_the_most_recent_frames_before_the_connection_point() {
    let vt: RingBuffer<VirtualThreadEvent> = RingBuffer::new(64);
    let broadcaster = EventBroadcaster::new(
        &vt,
        None,
        None,
        None,
        Arc::new(ActiveThreadsRegistry::new()),
        Arc::new(ThreadStateManager::new(Duration::from_millis(200))),
        // Capacity 3: only the last 3 of 5 published frames survive.
        Arc::new(RecentEventsBuffer::new(3)),
        Arc::new(ThreadEventsBuffer::new(100, 1000)),
        analyzers(),
        Arc::new(Counters::default()),
        16,
    );
    let _handle = broadcaster.spawn();

    for tid in 1..=5u64 {
        vt.publish(VirtualThreadEvent::start(tid, None, Instant::now()));
    }
    // Give the drain loop time to process all five before anyone connects.
    std::thread::sleep(Duration::from_millis(100));

    let (_sub, replay) = broadcaster.register_subscriber();
    let replayed_ids: Vec<i64> = replay
        .iter()
        .map(|frame| serde_json::from_str::<Value>(frame).unwrap()["threadId"].as_i64().unwrap())
        .collect();
    assert_eq!(replayed_ids, vec![3, 4, 5]);

    broadcaster.stop();
}

#[test]
fn overflow_accounting_reports_exact_drop_count_and_tail_window() {
    let rb: RingBuffer<u32> = RingBuffer::new(8);
    for i in 0..20u32 {
        rb.publish(i);
    }
    assert_eq!(rb.dropped_count(), 12);
    assert_eq!(rb.size(), 8);

    let mut consumer = rb.create_consumer_from_start();
    let batch = consumer.poll_batch(8, Duration::from_millis(20));
    assert_eq!(batch, vec![12, 13, 14, 15, 16, 17, 18, 19]);
}

#[test]
fn escaped_thread_name_survives_the_full_pipeline_to_the_wire() {
    let vt: RingBuffer<VirtualThreadEvent> = RingBuffer::new(64);
    let broadcaster = EventBroadcaster::new(
        &vt,
        None,
        None,
        None,
        Arc::new(ActiveThreadsRegistry::new()),
        Arc::new(ThreadStateManager::new(Duration::from_millis(200))),
        Arc::new(RecentEventsBuffer::new(100)),
        Arc::new(ThreadEventsBuffer::new(100, 1000)),
        analyzers(),
        Arc::new(Counters::default()),
        16,
    );
    let _handle = broadcaster.spawn();
    let (sub, _replay) = broadcaster.register_subscriber();

    vt.publish(VirtualThreadEvent::start(9, Some("a\"b\n".into()), Instant::now()));

    let frame = wait_for_frame(&sub, Duration::from_secs(2), |v| v["threadId"] == 9).expect("event frame for tid 9");
    assert_eq!(frame["threadName"], "a\"b\n");

    broadcaster.stop();
}

#[test]
fn gc_and_cpu_events_feed_analyzers_without_emitting_per_event_wire_frames() {
    let vt: RingBuffer<VirtualThreadEvent> = RingBuffer::new(64);
    let gc: RingBuffer<GcEvent> = RingBuffer::new(64);
    let cpu: RingBuffer<CpuEvent> = RingBuffer::new(64);
    let allocation: RingBuffer<AllocationEvent> = RingBuffer::new(64);
    let broadcaster = EventBroadcaster::new(
        &vt,
        Some(&gc),
        Some(&cpu),
        Some(&allocation),
        Arc::new(ActiveThreadsRegistry::new()),
        Arc::new(ThreadStateManager::new(Duration::from_millis(200))),
        Arc::new(RecentEventsBuffer::new(100)),
        Arc::new(ThreadEventsBuffer::new(100, 1000)),
        analyzers(),
        Arc::new(Counters::default()),
        16,
    );
    let _handle = broadcaster.spawn();
    let (sub, _replay) = broadcaster.register_subscriber();

    gc.publish(GcEvent {
        timestamp: Instant::now(),
        pause_nanos: 150_000_000,
        collector: "G1".into(),
        cause: "Allocation Failure".into(),
        heap_before: 100,
        heap_after: 40,
    });

    // No per-event frame for GC; the only surface is the periodic snapshot.
    let snapshot = wait_for_frame(&sub, Duration::from_secs(3), |v| v["type"] == "gc-analysis").expect("gc-analysis snapshot");
    assert!(snapshot["totalPauses"].as_u64().unwrap_or(0) >= 1);

    broadcaster.stop();
}
