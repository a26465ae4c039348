//! Agent iteration engine (§4.G).
//!
//! Grounded on the teacher's `runtime/turn.rs` — loop structure, usage
//! accounting formula, cancellation checkpoints — with one documented
//! divergence: the teacher dispatches tool calls concurrently via
//! `futures_util::future::join_all`; this engine dispatches them
//! sequentially in emission order, because the spec's "all remaining"/
//! "all subsequent" permission-denied and cancellation language is only
//! well-defined under sequential execution (§4.G supplement note).

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use tl_domain::event::ToolStatus;
use tl_domain::message::{FinishReason, Message, Part, Role, ToolCall, ToolResult};
use tl_domain::stream::{ProviderEvent, Usage};
use tl_domain::{Error, Event, MessageId, Result, SessionId};
use tl_providers::{ChatRequest, LlmProvider, ToolDefinition};
use tl_sessions::{MessageStore, SessionStore};
use tl_tools::{CancelToken, Invocation, InvocationEnv, PermissionService, ToolRegistry};

use crate::admission::AdmissionMap;
use crate::config::GatewayConfig;

/// A binary attachment submitted alongside a user turn (§3 supplement
/// "Binary attachment part"). The engine threads these into the
/// provider call as content parts; it never interprets them itself.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub media_type: String,
    pub data: String,
    pub name: Option<String>,
}

/// Inputs to one `Run` call (§4.G "Inputs and setup").
pub struct RunInput {
    pub session_id: SessionId,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub plan_mode: bool,
}

/// The reasoning↔tool loop (§4.G). Holds no per-run state; everything a
/// run needs is either threaded through `RunInput`/`CancelToken` or
/// loaded fresh from the stores on each call.
pub struct Engine {
    session_store: Arc<dyn SessionStore>,
    message_store: Arc<dyn MessageStore>,
    tools: Arc<ToolRegistry>,
    permissions: Arc<dyn PermissionService>,
    provider: Arc<dyn LlmProvider>,
    admission: Arc<AdmissionMap>,
    config: Arc<GatewayConfig>,
}

impl Engine {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        message_store: Arc<dyn MessageStore>,
        tools: Arc<ToolRegistry>,
        permissions: Arc<dyn PermissionService>,
        provider: Arc<dyn LlmProvider>,
        config: Arc<GatewayConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_store,
            message_store,
            tools,
            permissions,
            provider,
            admission: AdmissionMap::new(),
            config,
        })
    }

    /// Admit and start one run. Fails with `Error::SessionBusy` if a run
    /// (primary or summarize) is already active for this session (§4.G
    /// "Concurrency admission", the engine's only admission rule).
    pub fn run(self: &Arc<Self>, input: RunInput) -> Result<mpsc::Receiver<Event>> {
        let key = input.session_id.as_str().to_owned();
        let (guard, cancel) = self.admission.admit(key)?;
        let (tx, rx) = mpsc::channel(self.config.engine_channel_capacity);
        let this = self.clone();
        let session_id = input.session_id.clone();
        tokio::spawn(
            async move {
                this.worker(input, cancel, tx, guard).await;
            }
            .instrument(tracing::info_span!("agent_run", session_id = %session_id)),
        );
        Ok(rx)
    }

    /// `Cancel(sessionID)` (§4.G "Cancellation", §5 "Cancellation
    /// semantics"): cancels both the primary and `-summarize` handles.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        let primary = self.admission.cancel(session_id.as_str());
        let summarize = self.admission.cancel(&session_id.summarize_key());
        primary || summarize
    }

    /// The shared admission map, so the summarizer (§4.I) can admit
    /// under the same `-summarize` key and so a single `Cancel` call
    /// reaches both (§3 "Active request").
    pub fn admission(&self) -> Arc<AdmissionMap> {
        self.admission.clone()
    }

    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        self.session_store.clone()
    }

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        self.message_store.clone()
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        self.provider.clone()
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.clone()
    }

    async fn worker(
        self: Arc<Self>,
        input: RunInput,
        cancel: CancelToken,
        tx: mpsc::Sender<Event>,
        _guard: crate::admission::AdmissionGuard,
    ) {
        let session = self.session_store.get_or_create(&input.session_id);
        let (mut history, was_empty) = self.prepare_history(&session);

        if was_empty {
            let this = self.clone();
            let session_id = input.session_id.clone();
            tokio::spawn(async move {
                this.maybe_generate_title(session_id).await;
            });
        }

        let mut user_text = input.content.clone();
        if input.plan_mode {
            user_text.push_str(
                "\n<system-reminder>Plan mode is active: only read-only and planning tools \
                 are available. Call exit_plan_mode when ready to act.</system-reminder>",
            );
        }
        let mut user_message = Message::user(input.session_id.clone(), user_text);
        for attachment in &input.attachments {
            user_message.parts.push(Part::Attachment {
                media_type: attachment.media_type.clone(),
                data: attachment.data.clone(),
                name: attachment.name.clone(),
            });
        }
        self.message_store.append(user_message.clone());
        history.push(user_message);

        loop {
            if cancel.is_cancelled() {
                let _ = tx.send(Event::error("canceled")).await;
                return;
            }

            match self
                .stream_one_turn(&input.session_id, &self.config.default_model, &history, input.plan_mode, &cancel, &tx)
                .await
            {
                Ok((assistant, tool_message)) => {
                    let finish = assistant.finish_reason.unwrap_or(FinishReason::Unknown);
                    history.push(assistant.clone());
                    if let Some(tool_message) = tool_message.clone() {
                        history.push(tool_message);
                    }

                    if finish.continues_loop() && tool_message.is_some() {
                        continue;
                    }

                    if finish.is_error_terminal() {
                        let message = match finish {
                            FinishReason::PermissionDenied => "Permission denied",
                            _ => "canceled",
                        };
                        let _ = tx.send(Event::error(message)).await;
                    } else {
                        let reasoning = assistant.reasoning();
                        let _ = tx
                            .send(Event::Complete {
                                content: assistant.text(),
                                message_id: Some(assistant.id),
                                reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
                                reasoning_duration_ms: assistant.reasoning_duration_ms,
                                done: true,
                            })
                            .await;
                    }
                    return;
                }
                Err(err) => {
                    let _ = tx.send(Event::error(err.to_string())).await;
                    return;
                }
            }
        }
    }

    /// §4.G "History preparation" steps 1–2: list persisted messages and,
    /// if a summary anchor is set, truncate to start there, promoting the
    /// anchor to `User` role. Returns the prepared history and whether it
    /// was empty before the new utterance is appended (step 3).
    fn prepare_history(&self, session: &tl_domain::Session) -> (Vec<Message>, bool) {
        let mut history = self.message_store.list(&session.id);
        if let Some(summary_id) = session.summary_message_id {
            if let Some(pos) = history.iter().position(|m| m.id == summary_id) {
                history = history.split_off(pos);
                if let Some(anchor) = history.first_mut() {
                    anchor.role = Role::User;
                }
            }
        }
        let was_empty = history.is_empty();
        (history, was_empty)
    }

    /// §4.G history prep step 3: best-effort title generation, fired once
    /// per empty-history session. Failures are logged only, never
    /// surfaced as a stream error.
    async fn maybe_generate_title(&self, session_id: SessionId) {
        let request = ChatRequest {
            messages: vec![Message::user(
                session_id.clone(),
                "Generate a short (3-6 word) title for a conversation that is about to \
                 begin. Respond with the title text only, no punctuation.",
            )],
            tools: vec![],
            temperature: None,
            max_tokens: None,
            model: Some(self.config.default_model.clone()),
        };
        match self.provider.chat(&request).await {
            Ok(response) => {
                let title = response.content.trim().to_owned();
                if !title.is_empty() {
                    let mut session = self.session_store.get_or_create(&session_id);
                    session.title = Some(title);
                    self.session_store.save(&session);
                }
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "title generation failed");
            }
        }
    }

    /// §4.G "Streaming one assistant turn" + "execute the tool calls".
    async fn stream_one_turn(
        &self,
        session_id: &SessionId,
        model: &str,
        history: &[Message],
        plan_mode: bool,
        cancel: &CancelToken,
        tx: &mpsc::Sender<Event>,
    ) -> Result<(Message, Option<Message>)> {
        let allowed = self.tools.available(plan_mode);
        let tool_defs: Vec<ToolDefinition> = allowed
            .iter()
            .map(|t| {
                let info = t.info();
                ToolDefinition { name: info.name, description: info.description, parameters: info.parameters }
            })
            .collect();

        let mut assistant = Message::assistant_empty(session_id.clone(), model);
        let message_id = assistant.id;

        let request = ChatRequest {
            messages: history.to_vec(),
            tools: tool_defs,
            temperature: None,
            max_tokens: None,
            model: Some(model.to_owned()),
        };
        let mut stream = self.provider.chat_stream(&request).await?;

        let mut content_buf = String::new();
        let mut reasoning_buf = String::new();
        let mut reasoning_start: Option<Instant> = None;
        let mut usage: Option<Usage> = None;
        let mut provisional_reason = FinishReason::Unknown;
        let mut response_content: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                provisional_reason = FinishReason::Canceled;
                break;
            }
            let Some(event) = stream.next().await else { break };
            match event {
                ProviderEvent::ThinkingDelta { text } => {
                    if reasoning_start.is_none() {
                        reasoning_start = Some(Instant::now());
                    }
                    reasoning_buf.push_str(&text);
                }
                ProviderEvent::ContentDelta { text } => {
                    content_buf.push_str(&text);
                }
                ProviderEvent::ToolUseStart { tool_call } => {
                    assistant.parts.push(Part::ToolCall(ToolCall::started(tool_call.id.clone(), tool_call.name.clone())));
                    let _ = tx
                        .send(Event::Tool {
                            name: tool_call.name,
                            id: tool_call.id,
                            input: serde_json::json!({}),
                            status: ToolStatus::Pending,
                        })
                        .await;
                }
                ProviderEvent::ToolUseDelta { tool_call } => {
                    if let Some(tc) = assistant.tool_calls_mut().into_iter().find(|tc| tc.id == tool_call.id) {
                        tc.input.push_str(&tool_call.input_partial);
                    }
                }
                ProviderEvent::ToolUseStop { id } => {
                    if let Some(tc) = assistant.tool_calls_mut().into_iter().find(|tc| tc.id == id) {
                        tc.finished = true;
                    }
                }
                ProviderEvent::Error { message, canceled } => {
                    if canceled {
                        provisional_reason = FinishReason::Canceled;
                        break;
                    }
                    return Err(tl_providers::provider_error(self.provider.provider_id(), message, false));
                }
                ProviderEvent::Complete { response } => {
                    if assistant.tool_calls().is_empty() && !response.tool_calls.is_empty() {
                        for tc in response.tool_calls {
                            assistant.parts.push(Part::ToolCall(tc));
                        }
                    }
                    usage = Some(response.usage);
                    provisional_reason = response.finish_reason;
                    response_content = Some(response.content);
                    break;
                }
            }
        }

        if !content_buf.is_empty() {
            assistant.parts.push(Part::Text { text: content_buf });
        } else if let Some(content) = response_content.filter(|c| !c.is_empty()) {
            assistant.parts.push(Part::Text { text: content });
        }
        if !reasoning_buf.is_empty() {
            if let Some(start) = reasoning_start {
                assistant.reasoning_duration_ms = Some(start.elapsed().as_millis() as i64);
            }
            assistant.parts.push(Part::Reasoning { text: reasoning_buf });
        }

        if let Some(usage) = usage {
            self.apply_usage(session_id, model, usage);
        }

        let mut results = Vec::new();
        let mut final_reason = provisional_reason;

        if provisional_reason == FinishReason::Canceled {
            for call in assistant.tool_calls() {
                results.push(ToolResult::synthetic_canceled(call.id.clone()));
            }
        } else {
            let calls: Vec<ToolCall> = assistant.tool_calls().into_iter().cloned().collect();
            let mut closed_early = false;

            for call in &calls {
                if closed_early {
                    results.push(ToolResult::synthetic_canceled(call.id.clone()));
                    continue;
                }
                if cancel.is_cancelled() {
                    closed_early = true;
                    final_reason = FinishReason::Canceled;
                    results.push(ToolResult::synthetic_canceled(call.id.clone()));
                    continue;
                }

                let Some(tool) = self.tools.get(&call.name) else {
                    results.push(ToolResult::error(call.id.clone(), format!("Tool not found: {}", call.name)));
                    continue;
                };
                if plan_mode && !tool.plan_mode_allowed() {
                    results.push(ToolResult::error(
                        call.id.clone(),
                        "Tool not available in plan mode. Use exit_plan_mode to proceed with execution.",
                    ));
                    continue;
                }

                let _ = tx
                    .send(Event::Tool {
                        name: call.name.clone(),
                        id: call.id.clone(),
                        input: call.input_value(),
                        status: ToolStatus::Running,
                    })
                    .await;

                let env = InvocationEnv {
                    session_id: session_id.clone(),
                    message_id,
                    plan_mode,
                    cancel: cancel.clone(),
                    permissions: self.permissions.clone(),
                };
                let invocation = Invocation { id: call.id.clone(), name: call.name.clone(), input: call.input_value() };

                match tool.run(&env, invocation).await {
                    Ok(outcome) => {
                        let mut result = if outcome.is_error {
                            ToolResult::error(call.id.clone(), outcome.content)
                        } else {
                            ToolResult::ok(call.id.clone(), outcome.content)
                        };
                        result.metadata = outcome.metadata;
                        let _ = tx
                            .send(Event::Tool {
                                name: call.name.clone(),
                                id: call.id.clone(),
                                input: call.input_value(),
                                status: ToolStatus::Completed,
                            })
                            .await;
                        results.push(result);
                    }
                    Err(Error::PermissionDenied { .. }) => {
                        closed_early = true;
                        final_reason = FinishReason::PermissionDenied;
                        results.push(ToolResult::synthetic_permission_denied(call.id.clone()));
                    }
                    Err(Error::Canceled) => {
                        closed_early = true;
                        final_reason = FinishReason::Canceled;
                        results.push(ToolResult::synthetic_canceled(call.id.clone()));
                    }
                    Err(other) => {
                        results.push(ToolResult::error(call.id.clone(), other.to_string()));
                    }
                }
            }
        }

        assistant.finish(final_reason);
        self.message_store.append(assistant.clone());

        if results.is_empty() {
            return Ok((assistant, None));
        }
        let tool_message = Message::tool_results(session_id.clone(), results);
        self.message_store.append(tool_message.clone());
        Ok((assistant, Some(tool_message)))
    }

    /// §4.G "Usage accounting".
    fn apply_usage(&self, session_id: &SessionId, model: &str, usage: Usage) {
        let rates = self.config.rates_for(model);
        let cost_delta = (usage.cache_read_tokens as f64 * rates.cache_read_per_million
            + usage.cache_creation_tokens as f64 * rates.cache_creation_per_million
            + usage.input_tokens as f64 * rates.input_per_million
            + usage.output_tokens as f64 * rates.output_per_million)
            / 1_000_000.0;

        let mut session = self.session_store.get_or_create(session_id);
        session.cost += cost_delta;
        session.completion_tokens += usage.output_tokens + usage.cache_read_tokens;
        session.prompt_tokens += usage.input_tokens + usage.cache_creation_tokens;
        self.session_store.save(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_providers::{ScriptedProvider, ScriptedTurn};
    use tl_sessions::InMemoryStore;
    use tl_tools::{AllowAll, DenyAll, ToolInfo, ToolOutcome, ToolRegistry};

    struct EchoTool;

    #[async_trait::async_trait]
    impl tl_tools::Tool for EchoTool {
        fn info(&self) -> ToolInfo {
            ToolInfo { name: "echo".into(), description: "echoes input".into(), parameters: serde_json::json!({}), required: vec![] }
        }

        fn plan_mode_allowed(&self) -> bool {
            true
        }

        async fn run(&self, _env: &InvocationEnv, call: Invocation) -> Result<ToolOutcome> {
            Ok(ToolOutcome::ok(call.input.to_string()))
        }
    }

    struct WriteTool;

    #[async_trait::async_trait]
    impl tl_tools::Tool for WriteTool {
        fn info(&self) -> ToolInfo {
            ToolInfo { name: "write".into(), description: "writes".into(), parameters: serde_json::json!({}), required: vec![] }
        }

        async fn run(&self, env: &InvocationEnv, _call: Invocation) -> Result<ToolOutcome> {
            match env.permissions.check(tl_tools::PermissionRequest {
                session_id: env.session_id.to_string(),
                path: None,
                tool_name: "write".into(),
                action: "write".into(),
                description: "write a file".into(),
                params: serde_json::json!({}),
            }).await {
                tl_tools::PermissionDecision::Allowed => Ok(ToolOutcome::ok("wrote")),
                tl_tools::PermissionDecision::Denied { reason } => Err(Error::PermissionDenied { reason }),
            }
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(WriteTool));
        Arc::new(reg)
    }

    fn engine_with(provider: ScriptedProvider, permissions: Arc<dyn PermissionService>) -> Arc<Engine> {
        Engine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            registry(),
            permissions,
            Arc::new(provider),
            Arc::new(GatewayConfig::default()),
        )
    }

    #[tokio::test]
    async fn end_turn_with_no_tool_calls_emits_terminal_complete() {
        let engine = engine_with(ScriptedProvider::new("test", vec![ScriptedTurn::text("hi there")]), Arc::new(AllowAll));
        let mut rx = engine
            .run(RunInput { session_id: SessionId::new("s1"), content: "hello".into(), attachments: vec![], plan_mode: false })
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Complete { content, done: true, .. } if content == "hi there"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn second_run_for_busy_session_fails_immediately() {
        let engine = engine_with(ScriptedProvider::new("test", vec![ScriptedTurn::text("a"), ScriptedTurn::text("b")]), Arc::new(AllowAll));
        let _rx = engine.run(RunInput { session_id: SessionId::new("s1"), content: "hi".into(), attachments: vec![], plan_mode: false }).unwrap();
        let err = engine.run(RunInput { session_id: SessionId::new("s1"), content: "hi again".into(), attachments: vec![], plan_mode: false }).unwrap_err();
        assert!(matches!(err, Error::SessionBusy));
    }

    #[tokio::test]
    async fn tool_use_turn_executes_tool_and_loops_to_completion() {
        let tool_call_turn = ScriptedTurn {
            stream_events: vec![
                ProviderEvent::ToolUseStart { tool_call: tl_domain::stream::ToolCallRef { id: "c1".into(), name: "echo".into() } },
                ProviderEvent::ToolUseDelta { tool_call: tl_domain::stream::ToolCallInputDelta { id: "c1".into(), input_partial: "{\"x\":1}".into() } },
                ProviderEvent::ToolUseStop { id: "c1".into() },
                ProviderEvent::Complete {
                    response: tl_domain::stream::ProviderResponse {
                        content: String::new(),
                        tool_calls: vec![],
                        usage: Usage { input_tokens: 10, output_tokens: 5, ..Default::default() },
                        finish_reason: FinishReason::ToolUse,
                    },
                },
            ],
            chat_response: tl_domain::stream::ProviderResponse {
                content: String::new(),
                tool_calls: vec![],
                usage: Usage::default(),
                finish_reason: FinishReason::ToolUse,
            },
        };
        let engine = engine_with(
            ScriptedProvider::new("test", vec![tool_call_turn, ScriptedTurn::text("all done")]),
            Arc::new(AllowAll),
        );
        let mut rx = engine
            .run(RunInput { session_id: SessionId::new("s1"), content: "show me the cwd".into(), attachments: vec![], plan_mode: false })
            .unwrap();

        let tool_event = rx.recv().await.unwrap();
        assert!(matches!(tool_event, Event::Tool { status: ToolStatus::Pending, .. }));
        let running = rx.recv().await.unwrap();
        assert!(matches!(running, Event::Tool { status: ToolStatus::Running, .. }));
        let completed = rx.recv().await.unwrap();
        assert!(matches!(completed, Event::Tool { status: ToolStatus::Completed, .. }));
        let terminal = rx.recv().await.unwrap();
        assert!(matches!(terminal, Event::Complete { content, done: true, .. } if content == "all done"));
    }

    #[tokio::test]
    async fn plan_mode_denies_non_plan_tool_with_literal_message_and_continues_loop() {
        let tool_call_turn = ScriptedTurn {
            stream_events: vec![
                ProviderEvent::ToolUseStart { tool_call: tl_domain::stream::ToolCallRef { id: "c1".into(), name: "write".into() } },
                ProviderEvent::ToolUseStop { id: "c1".into() },
                ProviderEvent::Complete {
                    response: tl_domain::stream::ProviderResponse {
                        content: String::new(),
                        tool_calls: vec![],
                        usage: Usage::default(),
                        finish_reason: FinishReason::ToolUse,
                    },
                },
            ],
            chat_response: tl_domain::stream::ProviderResponse {
                content: String::new(),
                tool_calls: vec![],
                usage: Usage::default(),
                finish_reason: FinishReason::ToolUse,
            },
        };
        let engine = engine_with(ScriptedProvider::new("test", vec![tool_call_turn, ScriptedTurn::text("ok")]), Arc::new(AllowAll));
        let mut rx = engine
            .run(RunInput { session_id: SessionId::new("s1"), content: "write a file".into(), attachments: vec![], plan_mode: true })
            .unwrap();
        let terminal = rx.recv().await.unwrap();
        assert!(matches!(terminal, Event::Complete { done: true, .. }));

        // The synthetic denial text landed in the tool-result message, not
        // on the wire directly — inspect storage.
        let messages = engine.message_store.list(&SessionId::new("s1"));
        let denial = messages.iter().flat_map(|m| m.parts.iter()).find_map(|p| match p {
            Part::ToolResult(r) if r.tool_call_id == "c1" => Some(r.content.clone()),
            _ => None,
        });
        assert_eq!(denial.as_deref(), Some("Tool not available in plan mode. Use exit_plan_mode to proceed with execution."));
    }

    #[tokio::test]
    async fn permission_denied_tool_terminates_turn_with_error_event() {
        let tool_call_turn = ScriptedTurn {
            stream_events: vec![
                ProviderEvent::ToolUseStart { tool_call: tl_domain::stream::ToolCallRef { id: "c1".into(), name: "write".into() } },
                ProviderEvent::ToolUseStop { id: "c1".into() },
                ProviderEvent::Complete {
                    response: tl_domain::stream::ProviderResponse {
                        content: String::new(),
                        tool_calls: vec![],
                        usage: Usage::default(),
                        finish_reason: FinishReason::ToolUse,
                    },
                },
            ],
            chat_response: tl_domain::stream::ProviderResponse {
                content: String::new(),
                tool_calls: vec![],
                usage: Usage::default(),
                finish_reason: FinishReason::ToolUse,
            },
        };
        let engine = engine_with(
            ScriptedProvider::new("test", vec![tool_call_turn]),
            Arc::new(DenyAll { reason: Some("nope".into()) }),
        );
        let mut rx = engine
            .run(RunInput { session_id: SessionId::new("s1"), content: "write a file".into(), attachments: vec![], plan_mode: false })
            .unwrap();
        let terminal = rx.recv().await.unwrap();
        assert!(matches!(terminal, Event::Error { error } if error == "Permission denied"));
    }

    #[tokio::test]
    async fn title_generation_sets_session_title_on_first_turn() {
        let engine = engine_with(ScriptedProvider::new("test", vec![]), Arc::new(AllowAll));
        let session_id = SessionId::new("s1");
        let provider = ScriptedProvider::new("titler", vec![ScriptedTurn::text("Weekend Trip Planning")]);
        let titler = Engine::new(
            engine.session_store.clone(),
            Arc::new(InMemoryStore::new()),
            registry(),
            Arc::new(AllowAll),
            Arc::new(provider),
            Arc::new(GatewayConfig::default()),
        );
        titler.maybe_generate_title(session_id.clone()).await;
        let session = titler.session_store.get_or_create(&session_id);
        assert_eq!(session.title.as_deref(), Some("Weekend Trip Planning"));
    }

    /// A provider whose stream hangs until released, so a test can cancel
    /// the run while the turn is still in flight.
    struct GatedProvider {
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for GatedProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<tl_domain::stream::ProviderResponse> {
            unreachable!("test only exercises chat_stream")
        }

        async fn chat_stream(&self, _req: &ChatRequest) -> Result<tl_domain::stream::BoxStream<'static, ProviderEvent>> {
            let gate = self.gate.clone();
            // Yields one content delta once released, then ends. The
            // cancellation check at the top of `stream_one_turn`'s loop
            // (not the event match) is what turns this into a canceled
            // finish — this stream never gets the chance to complete.
            let stream = async_stream::stream! {
                gate.notified().await;
                yield ProviderEvent::ContentDelta { text: "partial".into() };
            };
            Ok(Box::pin(stream))
        }

        fn provider_id(&self) -> &str {
            "gated"
        }
    }

    /// §8 scenario 5 "Cancellation": canceling mid-turn leaves the stored
    /// assistant message with finish reason `canceled` and emits no
    /// further events for that run.
    #[tokio::test]
    async fn canceling_mid_turn_marks_stored_message_canceled() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let provider: Arc<dyn LlmProvider> = Arc::new(GatedProvider { gate: gate.clone() });
        let session_store: Arc<dyn tl_sessions::SessionStore> = Arc::new(InMemoryStore::new());
        let message_store: Arc<dyn tl_sessions::MessageStore> = Arc::new(InMemoryStore::new());
        let engine = Engine::new(session_store, message_store.clone(), registry(), Arc::new(AllowAll), provider, Arc::new(GatewayConfig::default()));

        let session_id = SessionId::new("s1");
        let mut rx = engine
            .run(RunInput { session_id: session_id.clone(), content: "do something slow".into(), attachments: vec![], plan_mode: false })
            .unwrap();

        // Let the worker task run up to the provider's gated await point
        // before canceling, so this exercises the mid-turn cancellation
        // path (stream_one_turn's loop) rather than the worker's
        // before-the-turn-starts check.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        assert!(engine.cancel(&session_id));
        gate.notify_one();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Error { error } if error == "canceled"));
        assert!(rx.recv().await.is_none());

        let history = message_store.list(&session_id);
        let assistant = history.iter().rev().find(|m| m.role == Role::Assistant).expect("assistant message persisted");
        assert_eq!(assistant.finish_reason, Some(FinishReason::Canceled));
    }
}
