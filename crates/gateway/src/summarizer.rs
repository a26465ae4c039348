//! Summarization sub-flow (§4.I).
//!
//! Grounded on the teacher's `runtime/compact.rs` (`split_for_compaction`,
//! `generate_summary`, marker-based truncation), adapted from a
//! marker-in-transcript design to the spec's `SummaryMessageID`-on-session
//! record design, and from a fire-and-forget background task to a
//! cancellable run admitted under the `-summarize` key so it shares the
//! engine's admission map (§3 "Active request").

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Instrument;

use tl_domain::message::{FinishReason, Message, Part};
use tl_domain::{Event, Result, SessionId};
use tl_providers::{ChatRequest, LlmProvider};
use tl_sessions::{MessageStore, SessionStore};

use crate::admission::AdmissionMap;
use crate::config::GatewayConfig;

const SUMMARY_PROMPT: &str = "Summarize the conversation above in a few sentences, focused on \
continuity: what was done, the current state, files touched, and what remains to be done next. \
Respond with the summary text only.";

pub struct Summarizer {
    session_store: Arc<dyn SessionStore>,
    message_store: Arc<dyn MessageStore>,
    provider: Arc<dyn LlmProvider>,
    admission: Arc<AdmissionMap>,
    config: Arc<GatewayConfig>,
}

impl Summarizer {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        message_store: Arc<dyn MessageStore>,
        provider: Arc<dyn LlmProvider>,
        admission: Arc<AdmissionMap>,
        config: Arc<GatewayConfig>,
    ) -> Arc<Self> {
        Arc::new(Self { session_store, message_store, provider, admission, config })
    }

    /// §4.I step 1: admit under `sessionID + "-summarize"`, exactly as
    /// the engine admits its primary runs. Fails with `SessionBusy` on
    /// conflict.
    pub fn run(self: &Arc<Self>, session_id: SessionId) -> Result<mpsc::Receiver<Event>> {
        let (guard, _cancel) = self.admission.admit(session_id.summarize_key())?;
        let (tx, rx) = mpsc::channel(8);
        let this = self.clone();
        tokio::spawn(
            async move {
                this.worker(session_id, tx, guard).await;
            }
            .instrument(tracing::info_span!("summarize")),
        );
        Ok(rx)
    }

    async fn worker(&self, session_id: SessionId, tx: mpsc::Sender<Event>, _guard: crate::admission::AdmissionGuard) {
        let _ = tx.send(Event::Summarize { progress: "Starting …".into(), done: false }).await;

        // Step 3: load messages; empty history is an error, not a no-op.
        let history = self.message_store.list(&session_id);
        if history.is_empty() {
            let _ = tx.send(Event::error("no messages to summarize")).await;
            return;
        }

        // Step 4: append a system-style user turn requesting the summary.
        let mut messages = history;
        messages.push(Message::user(session_id.clone(), SUMMARY_PROMPT));

        // Step 5: non-streaming call, zero tools.
        let request = ChatRequest {
            messages,
            tools: vec![],
            temperature: None,
            max_tokens: None,
            model: Some(self.config.default_model.clone()),
        };
        let response = match self.provider.chat(&request).await {
            Ok(response) => response,
            Err(err) => {
                let _ = tx.send(Event::error(err.to_string())).await;
                return;
            }
        };

        // Step 6: trim; empty summary is an error.
        let summary = response.content.trim().to_owned();
        if summary.is_empty() {
            let _ = tx.send(Event::error("summary was empty")).await;
            return;
        }

        // Step 7: persist the summary as a finished assistant message and
        // set it as the session's truncation anchor; reset prompt tokens
        // since the anchor now stands in for everything before it.
        let mut message = Message::assistant_empty(session_id.clone(), "summarizer");
        message.parts.push(Part::Text { text: summary });
        message.finish(FinishReason::EndTurn);
        self.message_store.append(message.clone());

        let rates = self.config.rates_for(&self.config.default_model);
        let cost_delta = (response.usage.input_tokens as f64 * rates.input_per_million
            + response.usage.output_tokens as f64 * rates.output_per_million)
            / 1_000_000.0;

        let mut session = self.session_store.get_or_create(&session_id);
        session.summary_message_id = Some(message.id);
        session.prompt_tokens = 0;
        session.completion_tokens = response.usage.output_tokens;
        session.cost += cost_delta;
        self.session_store.save(&session);

        // Step 8: terminal event.
        let _ = tx.send(Event::Summarize { progress: "Complete".into(), done: true }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_providers::{ScriptedProvider, ScriptedTurn};
    use tl_sessions::InMemoryStore;

    fn summarizer_with(provider: ScriptedProvider) -> Arc<Summarizer> {
        Summarizer::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(provider),
            AdmissionMap::new(),
            Arc::new(GatewayConfig::default()),
        )
    }

    #[tokio::test]
    async fn empty_history_emits_error_and_no_summary() {
        let summarizer = summarizer_with(ScriptedProvider::new("test", vec![]));
        let mut rx = summarizer.run(SessionId::new("s1")).unwrap();
        let starting = rx.recv().await.unwrap();
        assert!(matches!(starting, Event::Summarize { done: false, .. }));
        let err = rx.recv().await.unwrap();
        assert!(matches!(err, Event::Error { error } if error.contains("no messages")));
    }

    #[tokio::test]
    async fn successful_summary_sets_anchor_and_emits_terminal_done() {
        let summarizer = summarizer_with(ScriptedProvider::new("test", vec![ScriptedTurn::text("did X, next do Y")]));
        let session_id = SessionId::new("s1");
        summarizer.message_store.append(Message::user(session_id.clone(), "hello"));

        let mut rx = summarizer.run(session_id.clone()).unwrap();
        let _starting = rx.recv().await.unwrap();
        let terminal = rx.recv().await.unwrap();
        assert!(matches!(terminal, Event::Summarize { done: true, .. }));

        let session = summarizer.session_store.get_or_create(&session_id);
        assert!(session.summary_message_id.is_some());
        assert_eq!(session.prompt_tokens, 0);
    }

    #[tokio::test]
    async fn second_summarize_while_one_is_admitted_fails_busy() {
        let summarizer = summarizer_with(ScriptedProvider::new("test", vec![ScriptedTurn::text("a"), ScriptedTurn::text("b")]));
        let session_id = SessionId::new("s1");
        summarizer.message_store.append(Message::user(session_id.clone(), "hello"));
        let _rx = summarizer.run(session_id.clone()).unwrap();
        let err = summarizer.run(session_id).unwrap_err();
        assert!(matches!(err, tl_domain::Error::SessionBusy));
    }
}
