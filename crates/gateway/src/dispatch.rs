//! Inbound dispatcher (§4.C).
//!
//! Accepts `(sessionID, rawContent)` broadcast through the [`Broker`]
//! (§4.B) and, once a stream endpoint (§4.D) drains it from its outbox,
//! parses the `{text, media?[]}` envelope and routes by text prefix to
//! the shell handler, the slash-command handler, or the agent engine.
//! Grounded on the teacher's `tools/src/exec.rs` (`Command::new("sh")`
//! shell-execution shape) for the `!` handler and `runtime/tools.rs`'s
//! name-keyed dispatch for the slash-command shape.

use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc;

use tl_domain::{Event, SessionId};

use crate::commands::CommandRegistry;
use crate::engine::{Engine, RunInput};
use crate::summarizer::Summarizer;

/// The JSON envelope submitted on `POST /stream/{sessionId}/message`
/// (§4.C, §6 "Message submit").
#[derive(Debug, Clone, Deserialize)]
pub struct InboundPayload {
    pub text: String,
    #[serde(default)]
    pub media: Vec<String>,
}

impl InboundPayload {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Rewrite any `media[]` path that appears substring-matched inside
/// `text` into a single-quoted shell-safe token, so whitespace and glob
/// metacharacters in the path don't split on the shell's word
/// boundaries (§4.C "Path quoting").
fn quote_media_paths(text: &str, media: &[String]) -> String {
    let mut out = text.to_owned();
    for path in media {
        if path.is_empty() || !out.contains(path.as_str()) {
            continue;
        }
        let quoted = shell_quote(path);
        out = out.replace(path.as_str(), &quoted);
    }
    out
}

/// POSIX single-quote escaping: wrap in `'...'`, turning any embedded
/// `'` into `'\''` (close quote, literal quote, reopen quote).
fn shell_quote(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('\'');
    for ch in raw.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

pub struct Dispatcher {
    engine: Arc<Engine>,
    summarizer: Arc<Summarizer>,
    commands: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, summarizer: Arc<Summarizer>, commands: Arc<CommandRegistry>) -> Self {
        Self { engine, summarizer, commands }
    }

    /// Route one raw submission for `session_id`, writing every event
    /// it produces to `tx` (the stream endpoint's transport writer).
    pub async fn dispatch(&self, session_id: &SessionId, raw: &str, tx: &mpsc::Sender<Event>) {
        let payload = match InboundPayload::parse(raw) {
            Ok(p) => p,
            Err(err) => {
                let _ = tx.send(Event::error(format!("malformed message: {err}"))).await;
                return;
            }
        };

        if let Some(command) = payload.text.strip_prefix('!') {
            self.run_shell(command, &payload.media, tx).await;
        } else if payload.text.starts_with('/') {
            self.run_slash(session_id, &payload.text, tx).await;
        } else {
            self.run_agent(session_id, payload, tx).await;
        }
    }

    /// `"!"` prefix (§4.C "shell handler"): strip the prefix, quote any
    /// referenced media paths, combine stdout+stderr, emit one
    /// `complete` event. No agent interaction.
    async fn run_shell(&self, command: &str, media: &[String], tx: &mpsc::Sender<Event>) {
        let quoted = quote_media_paths(command, media);
        let output = Command::new("sh").arg("-c").arg(&quoted).output().await;
        let text = match output {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                combined
            }
            Err(err) => format!("failed to spawn shell: {err}"),
        };
        let _ = tx.send(Event::complete(text)).await;
    }

    /// `"/"` prefix (§4.C "slash-command handler"). `/summarize`
    /// specifically starts the summarization sub-flow (§4.I) rather
    /// than a plain registry lookup, since it needs the summarizer.
    async fn run_slash(&self, session_id: &SessionId, text: &str, tx: &mpsc::Sender<Event>) {
        let name = text.trim_start_matches('/').split_whitespace().next().unwrap_or("");
        if name == crate::commands::SUMMARIZE_COMMAND {
            match self.summarizer.run(session_id.clone()) {
                Ok(mut rx) => {
                    while let Some(event) = rx.recv().await {
                        let _ = tx.send(event).await;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Event::error(err.to_string())).await;
                }
            }
            return;
        }

        match self.commands.dispatch(text) {
            Ok(result) => {
                let _ = tx.send(Event::complete(result)).await;
            }
            Err(err) => {
                let _ = tx.send(Event::error(err)).await;
            }
        }
    }

    /// Anything else (§4.C "Otherwise"): invoke the agent iteration
    /// engine and forward its events until the run's channel closes.
    async fn run_agent(&self, session_id: &SessionId, payload: InboundPayload, tx: &mpsc::Sender<Event>) {
        let input = RunInput {
            session_id: session_id.clone(),
            content: payload.text,
            attachments: vec![],
            plan_mode: false,
        };
        match self.engine.run(input) {
            Ok(mut rx) => {
                while let Some(event) = rx.recv().await {
                    let _ = tx.send(event).await;
                }
            }
            Err(err) => {
                let _ = tx.send(Event::error(err.to_string())).await;
            }
        }
    }
}
