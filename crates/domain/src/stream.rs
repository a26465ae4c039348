//! Provider stream event vocabulary (§4.F).
//!
//! Lives in the domain crate, not the providers crate, because the
//! gateway engine and the providers crate both need it without the
//! engine depending on provider-client concerns.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token accounting for one provider turn (§4.F "Usage reports input,
/// output, cache-creation, and cache-read token counts").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallInputDelta {
    pub id: String,
    pub input_partial: String,
}

/// The final, fully-assembled response a non-streaming `chat()` call
/// returns, and the payload of a streaming `Complete` event (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<crate::message::ToolCall>,
    pub usage: Usage,
    pub finish_reason: crate::message::FinishReason,
}

/// Incremental events a provider stream emits for one assistant turn
/// (§4.F), in the order listed there for a typical turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    ThinkingDelta { text: String },
    ContentDelta { text: String },
    ToolUseStart { tool_call: ToolCallRef },
    ToolUseDelta { tool_call: ToolCallInputDelta },
    ToolUseStop { id: String },
    Error { message: String, canceled: bool },
    Complete { response: ProviderResponse },
}
