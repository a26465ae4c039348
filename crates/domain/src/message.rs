//! Session/message data model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId, ToolCallId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Terminal state of an assistant message (§4.G "Finish reasons").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    PermissionDenied,
    Canceled,
    Unknown,
}

impl FinishReason {
    /// Whether the outer iteration loop should run another round (§4.G
    /// "The iteration loop", step 3).
    pub fn continues_loop(self) -> bool {
        matches!(self, FinishReason::ToolUse)
    }

    /// Whether this finish reason is reported as a top-level `error`
    /// event rather than `complete` (§7 kinds 5, 6).
    pub fn is_error_terminal(self) -> bool {
        matches!(self, FinishReason::PermissionDenied | FinishReason::Canceled)
    }
}

/// A tool call discovered mid-stream (§3 ToolCall, §4.F ToolUseStart/Delta/Stop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    /// Raw JSON text, assembled incrementally from `ToolUseDelta` events.
    /// Only grows while `finished` is false (§3 invariant).
    pub input: String,
    pub finished: bool,
}

impl ToolCall {
    pub fn started(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: String::new(),
            finished: false,
        }
    }

    /// Parse `input` as JSON, defaulting to an empty object on malformed
    /// or empty text (the engine may still need to dispatch a call whose
    /// input never arrived as valid JSON).
    pub fn input_value(&self) -> serde_json::Value {
        if self.input.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.input).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// The recorded outcome of a tool call (§3 ToolResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub content: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
            metadata: None,
        }
    }

    /// A synthetic result closing out a tool call that never ran, because
    /// the assistant message terminated with `canceled` or
    /// `permission_denied` (§3 invariant, §4.G steps "close with synthetic
    /// canceled results" / "synthetic results").
    pub fn synthetic_canceled(tool_call_id: impl Into<String>) -> Self {
        Self::error(tool_call_id, "canceled")
    }

    pub fn synthetic_permission_denied(tool_call_id: impl Into<String>) -> Self {
        Self::error(tool_call_id, "permission denied")
    }
}

/// One part of a message's ordered content (§3 Message, §3 supplement
/// "Binary attachment part").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Reasoning { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Attachment {
        media_type: String,
        /// Base64-encoded bytes, or an opaque reference the store resolves.
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Marks the terminal finish reason of an assistant message. Once
    /// present the message is immutable (§3 invariant).
    Finish { reason: FinishReason },
}

/// A session/message-scoped turn record (§3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Wall-clock duration spent producing reasoning content, set once
    /// when the first reasoning delta closes out (§4.G "Usage accounting"
    /// and §9 "Reasoning duration").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_duration_ms: Option<i64>,
}

impl Message {
    pub fn user(session_id: SessionId, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            session_id,
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
            model: None,
            finish_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn assistant_empty(session_id: SessionId, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            session_id,
            role: Role::Assistant,
            parts: Vec::new(),
            model: Some(model.into()),
            finish_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tool_results(session_id: SessionId, results: Vec<ToolResult>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            session_id,
            role: Role::Tool,
            parts: results.into_iter().map(Part::ToolResult).collect(),
            model: None,
            finish_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Concatenation of all `Text` parts, in order (used to feed the
    /// summary-anchor message back to the provider as user context, and
    /// to read back the visible content of a completed assistant turn).
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn reasoning(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Reasoning { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls_mut(&mut self) -> Vec<&mut ToolCall> {
        self.parts
            .iter_mut()
            .filter_map(|p| match p {
                Part::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    /// Set the terminal finish marker. Per §3, once set this is immutable;
    /// callers must not call this twice.
    pub fn finish(&mut self, reason: FinishReason) {
        debug_assert!(
            self.finish_reason.is_none(),
            "finish() called twice on message {}",
            self.id
        );
        self.finish_reason = Some(reason);
        self.parts.push(Part::Finish { reason });
        self.updated_at = Utc::now();
    }
}

/// A named conversation container (§3 Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    /// Truncation anchor set by the summarizer (§4.I step 7); history
    /// preparation (§4.G) truncates to start here on subsequent turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: None,
            cost: 0.0,
            prompt_tokens: 0,
            completion_tokens: 0,
            summary_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
