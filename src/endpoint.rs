//! Subscriber-facing TCP endpoint: `/events` upgrade to a bidirectional
//! newline-JSON channel, plus a handful of synchronous HTTP-ish routes.
//!
//! Built directly on `std::net::TcpListener`, the same raw-socket idiom as
//! the teacher's `dashboard.rs` `start_web_server_with_cache`: one accept
//! loop thread, one `thread::spawn` per connection, `BufReader`/`BufWriter`
//! line framing. No HTTP or WebSocket crate — `/events` differs only in
//! that the connection stays open after the handshake line.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use socket2::{Domain, SockAddr, Socket, Type};

use crate::broadcaster::EventBroadcaster;
use crate::config::ServerConfig;
use crate::error::{ArgusError, ArgusResult};
use crate::subscriber::{SharedSubscriber, SubscriberState};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const WRITE_PUMP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SubscriptionEndpoint {
    running: Arc<AtomicBool>,
}

impl SubscriptionEndpoint {
    /// Binds and starts the accept loop on its own thread. Returns `None`
    /// if serving is disabled via config.
    pub fn start(
        broadcaster: Arc<EventBroadcaster>,
        config: &ServerConfig,
        static_dir: Option<PathBuf>,
    ) -> ArgusResult<Option<(Self, thread::JoinHandle<()>)>> {
        if !config.enabled {
            info!("endpoint: server.enabled=false, not starting");
            return Ok(None);
        }

        let addr: SocketAddr = format!("127.0.0.1:{}", config.port)
            .parse()
            .map_err(|_| ArgusError::InvalidConfig(format!("invalid server.port {}", config.port)))?;

        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(|source| ArgusError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_reuse_address(true).ok();
        #[cfg(unix)]
        socket.set_reuse_port(true).ok();
        socket.bind(&SockAddr::from(addr)).map_err(|source| ArgusError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.listen(128).map_err(|source| ArgusError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_nonblocking(true).map_err(|source| ArgusError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let listener: TcpListener = socket.into();
        info!("endpoint: listening on http://{addr}");

        let running = Arc::new(AtomicBool::new(true));
        let accept_running = running.clone();
        let static_dir = static_dir.map(Arc::new);

        let handle = thread::spawn(move || {
            accept_loop(listener, broadcaster, accept_running, static_dir);
        });

        Ok(Some((Self { running }, handle)))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

fn accept_loop(
    listener: TcpListener,
    broadcaster: Arc<EventBroadcaster>,
    running: Arc<AtomicBool>,
    static_dir: Option<Arc<PathBuf>>,
) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("endpoint: accepted connection from {peer}");
                let broadcaster = broadcaster.clone();
                let static_dir = static_dir.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, broadcaster, static_dir) {
                        debug!("endpoint: connection from {peer} ended: {e}");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                error!("endpoint: accept error: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    info!("endpoint: accept loop exiting");
}

fn handle_connection(
    stream: TcpStream,
    broadcaster: Arc<EventBroadcaster>,
    static_dir: Option<Arc<PathBuf>>,
) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }
    drain_headers(&mut reader)?;

    let path = request_path(&request_line);

    match path.as_deref() {
        Some("/events") => serve_events(reader, stream, broadcaster),
        Some("/health") => respond_json(&stream, 200, r#"{"status":"up"}"#),
        Some("/metrics") => respond_text(&stream, 200, "text/plain", &broadcaster.render_metrics()),
        Some("/gc-analysis") => respond_json(&stream, 200, &broadcaster.gc_snapshot_json()),
        Some("/cpu-metrics") => respond_json(&stream, 200, &broadcaster.cpu_snapshot_json()),
        Some(other) if other == "/" || other.starts_with("/public/") => serve_static(&stream, static_dir.as_deref(), other),
        _ => respond_text(&stream, 404, "text/plain", "not found"),
    }
}

fn drain_headers(reader: &mut BufReader<TcpStream>) -> std::io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
    }
    Ok(())
}

fn request_path(request_line: &str) -> Option<String> {
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    Some(target.split('?').next().unwrap_or(target).to_string())
}

/// Upgrades to the bidirectional channel: replays the recent-events buffer,
/// then runs a write pump thread fed by the subscriber's queue while this
/// thread reads inbound command frames.
fn serve_events(mut reader: BufReader<TcpStream>, stream: TcpStream, broadcaster: Arc<EventBroadcaster>) -> std::io::Result<()> {
    let (sub, replay) = broadcaster.register_subscriber();

    let write_stream = stream.try_clone()?;
    let writer = Arc::new(Mutex::new(BufWriter::new(write_stream)));

    write_handshake(&writer)?;

    let pump_sub = sub.clone();
    let pump_writer = writer.clone();
    let pump_handle = thread::spawn(move || write_pump(pump_sub, pump_writer, replay));

    let result = read_commands(&mut reader, &sub, &writer, &broadcaster);

    sub.set_state(SubscriberState::Draining);
    broadcaster.remove_subscriber(sub.id);
    let _ = pump_handle.join();
    result
}

fn write_handshake(writer: &Arc<Mutex<BufWriter<TcpStream>>>) -> std::io::Result<()> {
    let mut w = writer.lock();
    w.write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: argus-events\r\nConnection: Upgrade\r\n\r\n")?;
    w.flush()
}

fn write_pump(sub: SharedSubscriber, writer: Arc<Mutex<BufWriter<TcpStream>>>, replay: Vec<String>) {
    for frame in replay {
        if write_frame(&writer, &frame).is_err() {
            sub.close();
            return;
        }
    }
    sub.set_state(SubscriberState::Live);

    loop {
        match sub.take(WRITE_PUMP_IDLE_TIMEOUT) {
            Some(frame) => {
                if write_frame(&writer, &frame).is_err() {
                    sub.close();
                    return;
                }
            }
            None => {
                if sub.is_closed() {
                    return;
                }
            }
        }
    }
}

fn write_frame(writer: &Arc<Mutex<BufWriter<TcpStream>>>, frame: &str) -> std::io::Result<()> {
    let mut w = writer.lock();
    w.write_all(frame.as_bytes())?;
    w.write_all(b"\n")?;
    w.flush()
}

fn read_commands(
    reader: &mut BufReader<TcpStream>,
    sub: &SharedSubscriber,
    writer: &Arc<Mutex<BufWriter<TcpStream>>>,
    broadcaster: &Arc<EventBroadcaster>,
) -> std::io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 || sub.is_closed() {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(command) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        if command.get("command").and_then(Value::as_str) == Some("get-thread-events") {
            if let Some(thread_id) = command.get("threadId").and_then(Value::as_u64) {
                let events = broadcaster.thread_events(thread_id);
                let response = serde_json::json!({
                    "type": "thread-events",
                    "threadId": thread_id,
                    "events": events,
                });
                if write_frame(writer, &response.to_string()).is_err() {
                    return Ok(());
                }
            }
        }
        // Unknown commands (including pings) are silently ignored.
    }
}

fn serve_static(stream: &TcpStream, static_dir: Option<&PathBuf>, path: &str) -> std::io::Result<()> {
    let Some(root) = static_dir else {
        return respond_text(stream, 404, "text/plain", "static assets not configured");
    };

    let relative = if path == "/" { "index.html" } else { path.trim_start_matches('/') };
    let candidate = root.join(relative);

    if !path_is_contained(root, &candidate) {
        warn!("endpoint: rejected path traversal attempt: {path}");
        return respond_text(stream, 404, "text/plain", "not found");
    }

    match std::fs::read(&candidate) {
        Ok(body) => {
            let content_type = guess_content_type(&candidate);
            respond_bytes(stream, 200, content_type, &body)
        }
        Err(_) => respond_text(stream, 404, "text/plain", "not found"),
    }
}

fn path_is_contained(root: &Path, candidate: &Path) -> bool {
    !candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) && candidate.starts_with(root)
}

fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn respond_json(stream: &TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    respond_text(stream, status, "application/json", body)
}

fn respond_text(stream: &TcpStream, status: u16, content_type: &str, body: &str) -> std::io::Result<()> {
    respond_bytes(stream, status, content_type, body.as_bytes())
}

fn respond_bytes(mut stream: &TcpStream, status: u16, content_type: &str, body: &[u8]) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    };
    let header = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_path_strips_query_string() {
        assert_eq!(request_path("GET /gc-analysis?x=1 HTTP/1.1\r\n"), Some("/gc-analysis".to_string()));
    }

    #[test]
    fn request_path_handles_malformed_line() {
        assert_eq!(request_path(""), None);
    }

    #[test]
    fn path_traversal_is_rejected() {
        let root = PathBuf::from("/var/argus/public");
        let candidate = root.join("../../etc/passwd");
        assert!(!path_is_contained(&root, &candidate));
    }

    #[test]
    fn content_type_guess_covers_common_extensions() {
        assert_eq!(guess_content_type(Path::new("a.html")), "text/html");
        assert_eq!(guess_content_type(Path::new("a.js")), "application/javascript");
        assert_eq!(guess_content_type(Path::new("a.bin")), "application/octet-stream");
    }
}
