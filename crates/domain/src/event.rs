//! Wire event envelopes and their SSE codec (§4.A).
//!
//! Each event is serialized as a two-line record — `event: <name>`,
//! `data: <compact JSON>` — followed by a blank line, so one record can be
//! written atomically to a subscriber's outbox.

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Heartbeat {
        #[serde(rename = "type")]
        kind: HeartbeatKind,
    },
    Tool {
        name: String,
        id: String,
        input: serde_json::Value,
        status: ToolStatus,
    },
    Summarize {
        progress: String,
        done: bool,
    },
    Complete {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[serde(rename = "messageId")]
        message_id: Option<MessageId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[serde(rename = "reasoningDuration")]
        reasoning_duration_ms: Option<i64>,
        done: bool,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatKind {
    Ping,
}

impl Event {
    pub fn complete(content: impl Into<String>) -> Self {
        Event::Complete {
            content: content.into(),
            message_id: None,
            reasoning: None,
            reasoning_duration_ms: None,
            done: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error { error: message.into() }
    }

    /// The event name used in the wire record's `event:` line.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::Heartbeat { .. } => "heartbeat",
            Event::Tool { .. } => "tool",
            Event::Summarize { .. } => "summarize",
            Event::Complete { .. } => "complete",
            Event::Error { .. } => "error",
        }
    }

    /// Encode as the two-line-plus-blank SSE record described in §4.A.
    /// JSON is minimized (no trailing whitespace) so the record can be
    /// written to the outbox as a single atomic write.
    pub fn to_sse_record(&self) -> Result<String, serde_json::Error> {
        let payload = event_payload(self)?;
        let data = serde_json::to_string(&payload)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

/// The JSON payload half of the envelope, without the outer `event` tag —
/// callers on the wire see `data:` as just the fields, not `{"event":...}`.
fn event_payload(event: &Event) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(event)?;
    if let serde_json::Value::Object(ref mut map) = value {
        map.remove("event");
    }
    Ok(value)
}

/// Parse a single SSE record's `event:`/`data:` lines back into an `Event`.
/// Used for round-trip tests and is not required by clients (they may
/// treat unknown event names as opaque, per §6).
pub fn parse_sse_record(record: &str) -> Option<Event> {
    let mut name = None;
    let mut data = None;
    for line in record.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            name = Some(rest.trim().to_owned());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim().to_owned());
        }
    }
    let (name, data) = (name?, data?);
    let mut value: serde_json::Value = serde_json::from_str(&data).ok()?;
    if let serde_json::Value::Object(ref mut map) = value {
        map.insert("event".to_owned(), serde_json::Value::String(name));
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_round_trips() {
        let event = Event::Connected { session_id: "s1".into() };
        let record = event.to_sse_record().unwrap();
        assert!(record.starts_with("event: connected\n"));
        assert!(record.ends_with("\n\n"));
        let parsed = parse_sse_record(&record).unwrap();
        assert!(matches!(parsed, Event::Connected { session_id } if session_id == "s1"));
    }

    #[test]
    fn heartbeat_round_trips() {
        let event = Event::Heartbeat { kind: HeartbeatKind::Ping };
        let record = event.to_sse_record().unwrap();
        let parsed = parse_sse_record(&record).unwrap();
        assert!(matches!(parsed, Event::Heartbeat { kind: HeartbeatKind::Ping }));
    }

    #[test]
    fn tool_event_round_trips_byte_identical_payload() {
        let event = Event::Tool {
            name: "bash".into(),
            id: "c1".into(),
            input: serde_json::json!({"cmd": "ls"}),
            status: ToolStatus::Running,
        };
        let record = event.to_sse_record().unwrap();
        let data_line = record.lines().nth(1).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(data_line.strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(payload["name"], "bash");
        assert_eq!(payload["status"], "running");
        assert_eq!(payload["input"]["cmd"], "ls");
    }

    #[test]
    fn complete_event_has_no_trailing_whitespace_in_data_line() {
        let event = Event::complete("hi\n");
        let record = event.to_sse_record().unwrap();
        let data_line = record.lines().nth(1).unwrap();
        assert!(!data_line.ends_with(' '));
    }

    #[test]
    fn error_event_round_trips() {
        let event = Event::error("Permission denied");
        let record = event.to_sse_record().unwrap();
        let parsed = parse_sse_record(&record).unwrap();
        assert!(matches!(parsed, Event::Error { error } if error == "Permission denied"));
    }

    #[test]
    fn unknown_data_with_no_event_line_fails_to_parse() {
        assert!(parse_sse_record("data: {}\n\n").is_none());
    }
}
