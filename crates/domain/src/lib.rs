pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod stream;

pub use error::{Error, Result};
pub use event::Event;
pub use ids::{MessageId, SessionId, ToolCallId};
pub use message::{FinishReason, Message, Part, Role, Session, ToolCall, ToolResult};
pub use stream::{ProviderEvent, ProviderResponse, Usage};
