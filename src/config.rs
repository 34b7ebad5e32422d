//! Profiler configuration.
//!
//! Loaded from an optional TOML file and overridden by environment
//! variables, matching the options enumerated in the wire/HTTP contract.
//! Every field has a default, so a profiler with no config file at all is
//! still fully usable.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ArgusError, ArgusResult};

const ENV_CONFIG_PATH: &str = "ARGUS_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub buffer: BufferConfig,
    pub server: ServerConfig,
    pub recent: RecentConfig,
    pub thread: ThreadConfig,
    pub ended: EndedConfig,
    pub subscriber: SubscriberConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { size: 65_536 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    /// On-disk directory of bundled dashboard assets, served at `/` and
    /// `/public/*`. Argus never embeds or generates these; absent means
    /// every static route answers 404.
    pub static_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9202,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecentConfig {
    pub events_size: usize,
}

impl Default for RecentConfig {
    fn default() -> Self {
        Self { events_size: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    pub per_thread_events: usize,
    pub max_threads: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            per_thread_events: 100,
            max_threads: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndedConfig {
    pub retention_ms: u64,
}

impl Default for EndedConfig {
    fn default() -> Self {
        Self { retention_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub queue_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            server: ServerConfig::default(),
            recent: RecentConfig::default(),
            thread: ThreadConfig::default(),
            ended: EndedConfig::default(),
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl Config {
    /// Loads from the file at `path` if given, else from `$ARGUS_CONFIG` if
    /// set, else falls back to defaults. Environment variables always take
    /// precedence over whatever the file contains.
    pub fn load(path: Option<&Path>) -> ArgusResult<Self> {
        let mut cfg = match path.map(|p| p.to_path_buf()).or_else(|| env::var(ENV_CONFIG_PATH).ok().map(Into::into)) {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path) -> ArgusResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ArgusError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ArgusError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_usize("ARGUS_BUFFER_SIZE") {
            self.buffer.size = v;
        }
        if let Some(v) = env_bool("ARGUS_SERVER_ENABLED") {
            self.server.enabled = v;
        }
        if let Some(v) = env_u16("ARGUS_SERVER_PORT") {
            self.server.port = v;
        }
        if let Ok(v) = env::var("ARGUS_SERVER_STATIC_DIR") {
            self.server.static_dir = Some(v);
        }
        if let Some(v) = env_usize("ARGUS_RECENT_EVENTS_SIZE") {
            self.recent.events_size = v;
        }
        if let Some(v) = env_usize("ARGUS_THREAD_EVENTS_PER_THREAD") {
            self.thread.per_thread_events = v;
        }
        if let Some(v) = env_usize("ARGUS_THREAD_EVENTS_MAX_THREADS") {
            self.thread.max_threads = v;
        }
        if let Some(v) = env_u64("ARGUS_ENDED_RETENTION_MS") {
            self.ended.retention_ms = v;
        }
        if let Some(v) = env_usize("ARGUS_SUBSCRIBER_QUEUE_CAPACITY") {
            self.subscriber.queue_capacity = v;
        }
    }

    fn validate(&self) -> ArgusResult<()> {
        if !self.buffer.size.is_power_of_two() {
            return Err(ArgusError::InvalidConfig(format!(
                "buffer.size must be a power of two, got {}",
                self.buffer.size
            )));
        }
        if self.recent.events_size == 0 {
            return Err(ArgusError::InvalidConfig("recent.events.size must be > 0".into()));
        }
        if self.thread.per_thread_events == 0 {
            return Err(ArgusError::InvalidConfig("thread.events.per-thread must be > 0".into()));
        }
        if self.thread.max_threads == 0 {
            return Err(ArgusError::InvalidConfig("thread.events.max-threads must be > 0".into()));
        }
        if self.subscriber.queue_capacity == 0 {
            return Err(ArgusError::InvalidConfig("subscriber.queue.capacity must be > 0".into()));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
