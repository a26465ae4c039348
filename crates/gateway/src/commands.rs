//! Slash-command registry (§4.C "slash-command handler").
//!
//! Parsing is `/name arg1 arg2 …`, whitespace-delimited (§6 "Command
//! prefixes"); dispatch is a name-keyed lookup, grounded on the
//! teacher's `runtime/tools.rs` name-keyed `match` shape but applied to
//! slash commands rather than tool calls.

use std::collections::BTreeMap;
use std::sync::Arc;

/// A single slash command's behavior. Returns the text to surface on
/// the wire's `complete` event (§4.C: "emit one `complete` event with
/// the command's textual result").
pub trait SlashCommand: Send + Sync {
    fn name(&self) -> &str;
    fn help(&self) -> &str;
    fn run(&self, args: &[String]) -> String;
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn SlashCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn SlashCommand>) {
        self.commands.insert(command.name().to_owned(), command);
    }

    /// Parse `"/name arg1 arg2"` and dispatch. Returns `Err` with a
    /// textual parse/lookup failure for the caller to emit as an
    /// `error` event (§4.C: "or an `error` event on parse/execution
    /// failure").
    pub fn dispatch(&self, text: &str) -> Result<String, String> {
        let rest = text.strip_prefix('/').ok_or_else(|| "not a slash command".to_owned())?;
        let mut parts = rest.split_whitespace();
        let name = parts.next().ok_or_else(|| "empty slash command".to_owned())?;
        let args: Vec<String> = parts.map(str::to_owned).collect();

        if name == "help" {
            return Ok(self.help_text());
        }

        match self.commands.get(name) {
            Some(cmd) => Ok(cmd.run(&args)),
            None => Err(format!("Unknown command: /{name}")),
        }
    }

    /// Built-in `/help` listing (§8 scenario 2: content must contain
    /// the substrings `"Available"` and `"/help"`).
    fn help_text(&self) -> String {
        let mut lines = vec!["Available commands:".to_owned(), "  /help - show this message".to_owned()];
        for cmd in self.commands.values() {
            lines.push(format!("  /{} - {}", cmd.name(), cmd.help()));
        }
        lines.join("\n")
    }
}

/// `/summarize` — triggers the summarization sub-flow (§4.I). The
/// actual run is started by the dispatcher (it needs the summarizer,
/// not just text), so this command is a marker the dispatcher
/// recognizes before falling through to the generic registry lookup.
pub const SUMMARIZE_COMMAND: &str = "summarize";
