//! Placeholder [`LlmProvider`] used when no real provider client is wired
//! in (SPEC_FULL.md §1: concrete provider clients are out of scope for
//! this core). Without *some* implementation the binary can't start, so
//! this adapter reflects the last user message back as the assistant's
//! content and reports zero usage. It is glue for running the binary
//! standalone, not a spec requirement — swap it for a real adapter built
//! against [`tl_providers::LlmProvider`].

use async_stream::stream;
use tl_domain::message::{FinishReason, Role};
use tl_domain::stream::{BoxStream, ProviderEvent, ProviderResponse, Usage};
use tl_domain::Result;
use tl_providers::{ChatRequest, LlmProvider};

pub struct LoopbackProvider;

impl LoopbackProvider {
    fn reply_to(req: &ChatRequest) -> String {
        req.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| format!("(loopback) {}", m.text()))
            .unwrap_or_else(|| "(loopback) ...".to_owned())
    }
}

#[async_trait::async_trait]
impl LlmProvider for LoopbackProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ProviderResponse> {
        Ok(ProviderResponse {
            content: Self::reply_to(req),
            tool_calls: vec![],
            usage: Usage::default(),
            finish_reason: FinishReason::EndTurn,
        })
    }

    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, ProviderEvent>> {
        let content = Self::reply_to(req);
        let stream = stream! {
            yield ProviderEvent::ContentDelta { text: content.clone() };
            yield ProviderEvent::Complete {
                response: ProviderResponse {
                    content,
                    tool_calls: vec![],
                    usage: Usage::default(),
                    finish_reason: FinishReason::EndTurn,
                },
            };
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tl_domain::{Message, SessionId};

    #[tokio::test]
    async fn chat_echoes_last_user_message() {
        let provider = LoopbackProvider;
        let req = ChatRequest { messages: vec![Message::user(SessionId::new("s1"), "hi there")], ..Default::default() };
        let resp = provider.chat(&req).await.unwrap();
        assert!(resp.content.contains("hi there"));
    }

    #[tokio::test]
    async fn chat_stream_ends_with_complete() {
        let provider = LoopbackProvider;
        let req = ChatRequest { messages: vec![Message::user(SessionId::new("s1"), "hi")], ..Default::default() };
        let mut stream = provider.chat_stream(&req).await.unwrap();
        let _delta = stream.next().await.unwrap();
        let last = stream.next().await.unwrap();
        assert!(matches!(last, ProviderEvent::Complete { .. }));
        assert!(stream.next().await.is_none());
    }
}
