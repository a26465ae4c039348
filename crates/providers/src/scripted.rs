//! An in-memory provider that replays a fixed event script.
//!
//! Concrete provider clients are out of scope, but the engine needs
//! *something* implementing [`LlmProvider`] to be exercised in tests.
//! Grounded on the general pattern of faking a trait a crate doesn't
//! own an implementation of, sized well under the engine's own budget.

use parking_lot::Mutex;
use tl_domain::message::FinishReason;
use tl_domain::stream::{BoxStream, ProviderEvent, ProviderResponse, Usage};
use tl_domain::{Error, Result};

use crate::contract::{ChatRequest, LlmProvider};

/// One canned response: the sequence of streaming events to emit, and the
/// `chat()` (non-streaming) response to hand back instead when the
/// caller doesn't stream.
#[derive(Clone)]
pub struct ScriptedTurn {
    pub stream_events: Vec<ProviderEvent>,
    pub chat_response: ProviderResponse,
}

impl ScriptedTurn {
    /// A simple end-turn response with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            stream_events: vec![
                ProviderEvent::ContentDelta { text: content.clone() },
                ProviderEvent::Complete {
                    response: ProviderResponse {
                        content: content.clone(),
                        tool_calls: vec![],
                        usage: Usage { input_tokens: 10, output_tokens: 5, ..Default::default() },
                        finish_reason: FinishReason::EndTurn,
                    },
                },
            ],
            chat_response: ProviderResponse {
                content,
                tool_calls: vec![],
                usage: Usage { input_tokens: 10, output_tokens: 5, ..Default::default() },
                finish_reason: FinishReason::EndTurn,
            },
        }
    }
}

/// A provider that plays back a queue of [`ScriptedTurn`]s, one per call.
/// Panics (via an `Error::Other`) if the queue is exhausted, so tests
/// fail loudly instead of hanging.
pub struct ScriptedProvider {
    id: String,
    turns: Mutex<std::collections::VecDeque<ScriptedTurn>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        Self { id: id.into(), turns: Mutex::new(turns.into()) }
    }

    fn next_turn(&self) -> Result<ScriptedTurn> {
        self.turns
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Other("ScriptedProvider: script exhausted".into()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: &ChatRequest) -> Result<ProviderResponse> {
        Ok(self.next_turn()?.chat_response)
    }

    async fn chat_stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, ProviderEvent>> {
        let events = self.next_turn()?.stream_events;
        let stream = async_stream::stream! {
            for event in events {
                yield event;
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn replays_scripted_stream_events_in_order() {
        let provider = ScriptedProvider::new("test", vec![ScriptedTurn::text("hi")]);
        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, ProviderEvent::ContentDelta { text } if text == "hi"));
        let second = stream.next().await.unwrap();
        assert!(matches!(second, ProviderEvent::Complete { .. }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn exhausted_script_errors_instead_of_hanging() {
        let provider = ScriptedProvider::new("test", vec![]);
        let err = provider.chat(&ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[tokio::test]
    async fn chat_and_chat_stream_pop_independent_turns() {
        let provider = ScriptedProvider::new(
            "test",
            vec![ScriptedTurn::text("first"), ScriptedTurn::text("second")],
        );
        let resp = provider.chat(&ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content, "first");
        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let event = stream.next().await.unwrap();
        assert!(matches!(event, ProviderEvent::ContentDelta { text } if text == "second"));
    }
}
