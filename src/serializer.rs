//! Deterministic textual encoding of event records and analyzer/state
//! snapshots. One routine backs every wire frame so escaping and field
//! omission rules are applied consistently across the whole surface.

use serde_json::{json, Map, Value};

use crate::events::VirtualThreadEvent;

/// Serializes a `VirtualThreadEvent` into the wire `event` frame.
///
/// Always present: `type`, `threadId`, `timestamp`.
/// Present only when non-default: `threadName` (non-empty), `carrierThread`
/// (> 0), `duration` (> 0), `stackTrace` (non-empty).
pub fn serialize_vt_event(ev: &VirtualThreadEvent) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), json!(ev.event_type.as_str()));
    obj.insert("threadId".into(), json!(ev.thread_id));
    obj.insert("timestamp".into(), json!(monotonic_marker(ev.timestamp)));

    if let Some(name) = ev.thread_name.as_deref() {
        if !name.is_empty() {
            obj.insert("threadName".into(), json!(name));
        }
    }
    if ev.carrier_thread > 0 {
        obj.insert("carrierThread".into(), json!(ev.carrier_thread));
    }
    if ev.duration > 0 {
        obj.insert("duration".into(), json!(ev.duration));
    }
    if let Some(stack) = ev.stack_trace.as_deref() {
        if !stack.is_empty() {
            obj.insert("stackTrace".into(), json!(stack));
        }
    }

    Value::Object(obj)
}

/// `Instant` has no wall-clock meaning; the wire format reports an opaque,
/// monotonically increasing marker derived from it so subscribers can order
/// frames and compute deltas without needing real time.
pub fn monotonic_marker(instant: std::time::Instant) -> u128 {
    instant.elapsed().as_nanos()
}

/// Renders a `Value` as a single line of text (no embedded newlines),
/// suitable for the newline-delimited wire framing.
pub fn render_line(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Applies the spec's four-character escape set (backslash, double-quote,
/// newline, carriage return, tab) to `s`. Exposed directly for the
/// documented round-trip property; ordinary frame construction goes
/// through `serde_json` and gets the same escaping for free.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VirtualThreadEventType;
    use std::time::Instant;

    #[test]
    fn omits_absent_optional_fields() {
        let ev = VirtualThreadEvent {
            event_type: VirtualThreadEventType::Start,
            thread_id: 7,
            thread_name: None,
            carrier_thread: 0,
            timestamp: Instant::now(),
            duration: 0,
            stack_trace: None,
        };
        let v = serialize_vt_event(&ev);
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(!obj.contains_key("threadName"));
        assert!(!obj.contains_key("carrierThread"));
        assert!(!obj.contains_key("duration"));
        assert!(!obj.contains_key("stackTrace"));
    }

    #[test]
    fn includes_present_optional_fields() {
        let ev = VirtualThreadEvent {
            event_type: VirtualThreadEventType::Pinned,
            thread_id: 7,
            thread_name: Some("worker".into()),
            carrier_thread: 3,
            timestamp: Instant::now(),
            duration: 100,
            stack_trace: Some("at foo.bar".into()),
        };
        let v = serialize_vt_event(&ev);
        let obj = v.as_object().unwrap();
        assert_eq!(obj["type"], "PINNED");
        assert_eq!(obj["threadName"], "worker");
        assert_eq!(obj["carrierThread"], 3);
        assert_eq!(obj["duration"], 100);
        assert_eq!(obj["stackTrace"], "at foo.bar");
    }

    #[test]
    fn escapes_control_characters() {
        let escaped = escape("a\"b\n");
        assert_eq!(escaped, "a\\\"b\\n");
    }

    #[test]
    fn round_trips_through_serde_json() {
        let ev = VirtualThreadEvent {
            event_type: VirtualThreadEventType::End,
            thread_id: 42,
            thread_name: Some("a\"b\n".into()),
            carrier_thread: 0,
            timestamp: Instant::now(),
            duration: 55,
            stack_trace: None,
        };
        let line = render_line(&serialize_vt_event(&ev));
        let decoded: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded["threadId"], 42);
        assert_eq!(decoded["threadName"], "a\"b\n");
        assert_eq!(decoded["duration"], 55);
    }
}
