//! Provider contract (§4.F).
//!
//! Concrete LLM provider clients (HTTP, OAuth, retry back-off) are
//! deliberately out of scope — only this trait and the tool-call
//! request/response shapes around it belong to the core.

use tl_domain::message::{FinishReason, Message, ToolCall};
use tl_domain::stream::{BoxStream, ProviderEvent, ProviderResponse, Usage};
use tl_domain::{Error, Result};

/// A tool definition advertised to the provider (§4.E `Info()` shape,
/// as seen from the provider's side of the wire).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A provider-agnostic chat request (§4.F `StreamResponse(ctx, messages[], tools[])`).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

/// Trait every provider adapter implements. Adapters themselves (the
/// concrete HTTP clients) live outside this crate's responsibility.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Non-streaming call, used by the summarizer (§4.I step 5, "zero
    /// tools") and by title generation (§4.G history prep step 3).
    async fn chat(&self, req: &ChatRequest) -> Result<ProviderResponse>;

    /// Streaming call driving the engine's per-turn loop (§4.G "Streaming
    /// one assistant turn").
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, ProviderEvent>>;

    fn provider_id(&self) -> &str;
}

/// Collapse a finished stream's accumulated state into the `Complete`
/// event's response shape. Shared by `ScriptedProvider` and by real
/// adapters outside this crate so the accounting stays in one place.
pub fn assemble_response(
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
    finish_reason: FinishReason,
) -> ProviderResponse {
    ProviderResponse {
        content,
        tool_calls,
        usage,
        finish_reason,
    }
}

/// Convert a provider-level cancellation into the distinguished engine
/// error kind (§7 kind 3: "finish reason set to canceled if the
/// provider error was a cancellation").
pub fn provider_error(provider_id: &str, message: impl Into<String>, canceled: bool) -> Error {
    if canceled {
        Error::Canceled
    } else {
        Error::Provider { provider: provider_id.to_owned(), message: message.into() }
    }
}
