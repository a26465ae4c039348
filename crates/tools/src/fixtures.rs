//! Reference tools used to exercise the engine end to end (§4.E
//! supplement). Not a tool catalog the core maintains — a minimal set
//! covering read-only browsing, plan-mode control, and the
//! read-before-write invariant.
//!
//! Path containment is grounded on the teacher's `file_ops.rs`
//! `validate_path`: reject raw `..` components and absolute paths,
//! then canonicalize and check containment under the workspace root.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use tl_sessions::{FileHistoryStore, FileVersion};

use crate::contract::{Invocation, InvocationEnv, Tool, ToolInfo, ToolOutcome};
use crate::permission::{PermissionDecision, PermissionRequest};

fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!("absolute paths are not allowed (got '{requested}')"));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }
    let canonical_root = workspace_root
        .canonicalize()
        .map_err(|e| format!("cannot resolve workspace root '{}': {e}", workspace_root.display()))?;
    let candidate = canonical_root.join(requested_path);
    let resolved = if candidate.exists() {
        candidate.canonicalize().map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        tail.push(name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };
    if !resolved.starts_with(&canonical_root) {
        return Err(format!("path '{requested}' resolves outside workspace root '{}'", canonical_root.display()));
    }
    Ok(resolved)
}

const TRUNCATION_CAP: usize = 4000;

fn truncate(mut s: String) -> String {
    if s.len() > TRUNCATION_CAP {
        s.truncate(TRUNCATION_CAP);
        s.push_str("\n… truncated …");
    }
    s
}

/// `list`: directory listing (§4.E reference set, always plan-mode-allowed).
pub struct ListTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ListTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "list".into(),
            description: "List entries in a directory under the workspace root.".into(),
            parameters: serde_json::json!({"path": {"type": "string"}}),
            required: vec![],
        }
    }

    fn plan_mode_allowed(&self) -> bool {
        true
    }

    async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let path = call.input.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = match validate_path(&self.workspace_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(e) => e,
            Err(e) => return Ok(ToolOutcome::error(format!("failed to read '{path}': {e}"))),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            names.push(if is_dir { format!("{name}/") } else { name });
        }
        names.sort();
        Ok(ToolOutcome::ok(truncate(names.join("\n"))))
    }
}

/// `view`: read a file, optionally a line range (§4.E reference set).
pub struct ViewTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ViewTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "view".into(),
            description: "Read a file's contents, optionally restricted to a line range.".into(),
            parameters: serde_json::json!({
                "path": {"type": "string"},
                "offset": {"type": "integer"},
                "limit": {"type": "integer"},
            }),
            required: vec!["path".into()],
        }
    }

    fn plan_mode_allowed(&self) -> bool {
        true
    }

    async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let Some(path) = call.input.get("path").and_then(Value::as_str) else {
            return Ok(ToolOutcome::error("'path' is required"));
        };
        let resolved = match validate_path(&self.workspace_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolOutcome::error(format!("failed to read '{path}': {e}"))),
        };
        let offset = call.input.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = call.input.get("limit").and_then(Value::as_u64).map(|v| v as usize);
        let lines: Vec<&str> = content.lines().skip(offset).collect();
        let selected = match limit {
            Some(n) => lines.into_iter().take(n).collect::<Vec<_>>(),
            None => lines,
        };
        Ok(ToolOutcome::ok(truncate(selected.join("\n"))))
    }
}

fn glob_to_regex(pattern: &str) -> regex::Regex {
    let mut out = String::from("(?s)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    regex::Regex::new(&out).unwrap_or_else(|_| regex::Regex::new("$^").unwrap())
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(meta) = entry.metadata() {
            if meta.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(path.strip_prefix(root).unwrap_or(&path).to_path_buf());
            }
        }
    }
}

/// `glob`: find files matching a shell-style glob pattern (§4.E reference set).
pub struct GlobTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for GlobTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "glob".into(),
            description: "Find files under the workspace root matching a glob pattern.".into(),
            parameters: serde_json::json!({"pattern": {"type": "string"}}),
            required: vec!["pattern".into()],
        }
    }

    fn plan_mode_allowed(&self) -> bool {
        true
    }

    async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let Some(pattern) = call.input.get("pattern").and_then(Value::as_str) else {
            return Ok(ToolOutcome::error("'pattern' is required"));
        };
        let root = self.workspace_root.clone();
        let pattern = pattern.to_owned();
        let matched = tokio::task::spawn_blocking(move || {
            let re = glob_to_regex(&pattern);
            let mut all = Vec::new();
            walk(&root, &root, &mut all);
            all.retain(|p| re.is_match(&p.to_string_lossy()));
            all.sort();
            all
        })
        .await
        .unwrap_or_default();
        let listing = matched.into_iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>().join("\n");
        Ok(ToolOutcome::ok(truncate(listing)))
    }
}

/// `search`: grep-like substring/regex search across workspace files
/// (§4.E reference set).
pub struct SearchTool {
    pub workspace_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for SearchTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "search".into(),
            description: "Search file contents under the workspace root for a regex pattern.".into(),
            parameters: serde_json::json!({"pattern": {"type": "string"}}),
            required: vec!["pattern".into()],
        }
    }

    fn plan_mode_allowed(&self) -> bool {
        true
    }

    async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let Some(pattern) = call.input.get("pattern").and_then(Value::as_str) else {
            return Ok(ToolOutcome::error("'pattern' is required"));
        };
        let re = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::error(format!("invalid pattern: {e}"))),
        };
        let root = self.workspace_root.clone();
        let hits = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            walk(&root, &root, &mut files);
            let mut hits = Vec::new();
            for rel in files {
                let Ok(content) = std::fs::read_to_string(root.join(&rel)) else { continue };
                for (lineno, line) in content.lines().enumerate() {
                    if re.is_match(line) {
                        hits.push(format!("{}:{}:{}", rel.to_string_lossy(), lineno + 1, line));
                    }
                }
            }
            hits
        })
        .await
        .unwrap_or_default();
        Ok(ToolOutcome::ok(truncate(hits.join("\n"))))
    }
}

/// `todo_write`: records the plan-mode todo list the model is building
/// (plan-mode control tool, §4.E reference set). Stores entries
/// in-process; has no effect on the transcript beyond its tool result.
#[derive(Default)]
pub struct TodoWriteTool {
    state: RwLock<Vec<String>>,
}

#[async_trait::async_trait]
impl Tool for TodoWriteTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "todo_write".into(),
            description: "Replace the current plan's todo list.".into(),
            parameters: serde_json::json!({"todos": {"type": "array", "items": {"type": "string"}}}),
            required: vec!["todos".into()],
        }
    }

    fn plan_mode_allowed(&self) -> bool {
        true
    }

    async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let todos: Vec<String> = call
            .input
            .get("todos")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();
        *self.state.write() = todos.clone();
        Ok(ToolOutcome::ok(format!("{} todo(s) recorded", todos.len())))
    }
}

/// `plan_exit`: the model's signal that planning is complete and normal
/// tool execution should resume (§8 scenario 6, §9 design notes).
/// Carries no state of its own — the engine is responsible for clearing
/// `plan_mode` on the session when this tool succeeds.
pub struct PlanExitTool;

#[async_trait::async_trait]
impl Tool for PlanExitTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "exit_plan_mode".into(),
            description: "Exit plan mode and allow normal tool execution to resume.".into(),
            parameters: serde_json::json!({"plan": {"type": "string"}}),
            required: vec![],
        }
    }

    fn plan_mode_allowed(&self) -> bool {
        true
    }

    async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let plan = call.input.get("plan").and_then(Value::as_str).unwrap_or("");
        Ok(ToolOutcome::ok(format!("plan mode exited\n{plan}")))
    }
}

/// Per-workspace, per-path last-read timestamps, backing the
/// read-before-write invariant (§4.E).
#[derive(Default)]
pub struct ReadTimes {
    last_read: RwLock<HashMap<PathBuf, SystemTime>>,
}

impl ReadTimes {
    pub fn record(&self, path: &Path, at: SystemTime) {
        self.last_read.write().insert(path.to_path_buf(), at);
    }

    pub fn get(&self, path: &Path) -> Option<SystemTime> {
        self.last_read.read().get(path).copied()
    }
}

/// `write_file`: demonstrates the read-before-write invariant end to
/// end (§4.E, §9 Open Question — see DESIGN.md for the literal rule
/// this implements). Also consults the permission service, since
/// writing is the canonical action a `PermissionService` gates.
pub struct WriteFileTool {
    pub workspace_root: PathBuf,
    pub read_times: ReadTimes,
    pub file_history: Arc<dyn FileHistoryStore>,
}

impl WriteFileTool {
    pub fn new(workspace_root: PathBuf, file_history: Arc<dyn FileHistoryStore>) -> Self {
        Self { workspace_root, read_times: ReadTimes::default(), file_history }
    }

    /// Call this whenever the paired `view` tool reads `path`, so a
    /// subsequent write against it is permitted.
    pub fn note_read(&self, path: &Path) {
        self.read_times.record(path, SystemTime::now());
    }
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "write_file".into(),
            description: "Write content to a file under the workspace root.".into(),
            parameters: serde_json::json!({
                "path": {"type": "string"},
                "content": {"type": "string"},
            }),
            required: vec!["path".into(), "content".into()],
        }
    }

    async fn run(&self, env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
        let (Some(path), Some(content)) = (
            call.input.get("path").and_then(Value::as_str),
            call.input.get("content").and_then(Value::as_str),
        ) else {
            return Ok(ToolOutcome::error("'path' and 'content' are required"));
        };

        let resolved = match validate_path(&self.workspace_root, path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutcome::error(e)),
        };

        if resolved.exists() {
            let mtime = resolved.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
            match self.read_times.get(&resolved) {
                Some(read_at) if read_at >= mtime => {}
                _ => {
                    return Ok(ToolOutcome::error(format!(
                        "'{path}' was modified since it was last read; read it again before writing"
                    )))
                }
            }
        }

        let decision = env
            .permissions
            .check(PermissionRequest {
                session_id: env.session_id.to_string(),
                path: Some(path.to_owned()),
                tool_name: "write_file".into(),
                action: "write".into(),
                description: format!("write {} bytes to {path}", content.len()),
                params: call.input.clone(),
            })
            .await;
        if let PermissionDecision::Denied { reason } = decision {
            return Err(tl_domain::Error::PermissionDenied { reason });
        }

        // §9 Open Question, mirrored literally: if the prior recorded
        // version's text differs from what we just read off disk, the
        // file changed outside this tool's own history — snapshot the
        // read value as an intermediate version before writing the new
        // one.
        if let Ok(on_disk) = tokio::fs::read_to_string(&resolved).await {
            if let Some(last) = self.file_history.get_last_version(&env.session_id, path) {
                if last.content != on_disk {
                    self.file_history.create_version(
                        &env.session_id,
                        FileVersion { path: path.to_owned(), content: on_disk, recorded_at: Utc::now() },
                    );
                }
            }
        }

        if let Some(parent) = resolved.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&resolved, content).await {
            return Ok(ToolOutcome::error(format!("failed to write '{path}': {e}")));
        }
        self.read_times.record(&resolved, SystemTime::now());
        self.file_history.create_version(
            &env.session_id,
            FileVersion { path: path.to_owned(), content: content.to_owned(), recorded_at: Utc::now() },
        );

        Ok(ToolOutcome::ok(format!("wrote {} bytes to {path}", content.len())))
    }
}
