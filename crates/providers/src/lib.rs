pub mod contract;
pub mod scripted;

pub use contract::{assemble_response, provider_error, ChatRequest, LlmProvider, ToolDefinition};
pub use scripted::{ScriptedProvider, ScriptedTurn};
