//! Event distribution and live-state subsystem for a virtual-thread runtime
//! profiler: ring buffers in, analyzers and broadcast fan-out, subscribers
//! out.
//!
//! `Argus` wires the pieces together explicitly — the four ring buffers,
//! the drain-loop broadcaster, and the subscription endpoint are all
//! instantiated and injected here, never hidden behind a process-wide
//! static.

pub mod analyzers;
pub mod broadcaster;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ring_buffer;
pub mod serializer;
pub mod state;
pub mod subscriber;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::info;

use broadcaster::{Analyzers, EventBroadcaster};
use config::Config;
use endpoint::SubscriptionEndpoint;
use error::ArgusResult;
use events::{AllocationEvent, CpuEvent, GcEvent, VirtualThreadEvent};
use metrics::Counters;
use ring_buffer::RingBuffer;
use state::{ActiveThreadsRegistry, RecentEventsBuffer, ThreadEventsBuffer, ThreadStateManager};

/// The profiler's four event intake points. The event-source adapter is an
/// external collaborator: it owns publishing onto these, Argus only drains.
pub struct EventSinks {
    pub vt: RingBuffer<VirtualThreadEvent>,
    pub gc: RingBuffer<GcEvent>,
    pub cpu: RingBuffer<CpuEvent>,
    pub allocation: RingBuffer<AllocationEvent>,
}

pub struct Argus {
    pub sinks: EventSinks,
    broadcaster: Arc<EventBroadcaster>,
    broadcaster_handle: Mutex<Option<JoinHandle<()>>>,
    endpoint: Option<SubscriptionEndpoint>,
    endpoint_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Argus {
    /// Builds every component from `config` and starts the broadcaster's
    /// drain loop and (if enabled) the subscription endpoint's accept loop.
    pub fn start(config: &Config) -> ArgusResult<Self> {
        let sinks = EventSinks {
            vt: RingBuffer::new(config.buffer.size),
            gc: RingBuffer::new(config.buffer.size),
            cpu: RingBuffer::new(config.buffer.size),
            allocation: RingBuffer::new(config.buffer.size),
        };

        let registry = Arc::new(ActiveThreadsRegistry::new());
        let thread_states = Arc::new(ThreadStateManager::new(Duration::from_millis(config.ended.retention_ms)));
        let recent = Arc::new(RecentEventsBuffer::new(config.recent.events_size));
        let per_thread = Arc::new(ThreadEventsBuffer::new(config.thread.per_thread_events, config.thread.max_threads));
        let analyzers = Arc::new(Analyzers::default());
        let counters = Arc::new(Counters::default());

        let broadcaster = EventBroadcaster::new(
            &sinks.vt,
            Some(&sinks.gc),
            Some(&sinks.cpu),
            Some(&sinks.allocation),
            registry,
            thread_states,
            recent,
            per_thread,
            analyzers,
            counters,
            config.subscriber.queue_capacity,
        );
        let broadcaster_handle = broadcaster.spawn();

        let static_dir = config.server.static_dir.clone().map(PathBuf::from);
        let (endpoint, endpoint_handle) = match SubscriptionEndpoint::start(broadcaster.clone(), &config.server, static_dir)? {
            Some((endpoint, handle)) => (Some(endpoint), Some(handle)),
            None => (None, None),
        };

        Ok(Self {
            sinks,
            broadcaster,
            broadcaster_handle: Mutex::new(Some(broadcaster_handle)),
            endpoint,
            endpoint_handle: Mutex::new(endpoint_handle),
        })
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    /// Signals every running component to shut down and blocks until the
    /// broadcaster's drain loop and the endpoint's accept loop have exited.
    pub fn stop(&self) {
        if let Some(endpoint) = &self.endpoint {
            endpoint.stop();
        }
        if let Some(handle) = self.endpoint_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        self.broadcaster.stop();
        if let Some(handle) = self.broadcaster_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        info!("argus: shutdown complete");
    }
}
