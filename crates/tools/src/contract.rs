//! Tool trait, invocation environment, and registry (§4.E).
//!
//! The engine is generic over [`Tool`]; this crate contains no
//! tool-specific code beyond the permission-denied and plan-mode checks
//! the contract itself calls out, which live here rather than in the
//! engine because they're properties of the *contract*, not the loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tl_domain::{MessageId, SessionId};

use crate::permission::{CancelToken, PermissionService};

/// Per-call context passed to `Tool::run`, replacing an untyped context
/// bag (§9 "Context-carried values").
#[derive(Clone)]
pub struct InvocationEnv {
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub plan_mode: bool,
    pub cancel: CancelToken,
    pub permissions: Arc<dyn PermissionService>,
}

/// Declares a tool's name, description, and JSON-Schema-like parameter
/// shape (§4.E `Info()`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub required: Vec<String>,
}

/// The outcome of a tool invocation (§4.E `Run()` success case; a
/// `PermissionDenied` error is distinguished and returned as `Err`
/// instead, per the contract).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: None, is_error: false }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: None, is_error: true }
    }
}

/// A single tool call's identity and raw input, as recorded on the
/// assistant message (§3 ToolCall).
pub struct Invocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Every tool implements this contract (§4.E). `plan_mode_allowed`
/// reports whether the tool belongs to the small fixed set the engine
/// permits while plan mode is active (§4.G step 1) — it is a property
/// of the tool, not something the engine hardcodes by name.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;

    fn plan_mode_allowed(&self) -> bool {
        false
    }

    async fn run(&self, env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome>;
}

/// Name → tool lookup. The engine only ever calls `get`/`list`; it has
/// no tool-specific branches.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.info().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tools, or only those allowed in plan mode when `plan_mode`
    /// is set (§4.G step 1).
    pub fn available(&self, plan_mode: bool) -> Vec<Arc<dyn Tool>> {
        self.tools
            .values()
            .filter(|t| !plan_mode || t.plan_mode_allowed())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{AllowAll, CancelToken};

    struct Echo;

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn info(&self) -> ToolInfo {
            ToolInfo {
                name: "echo".into(),
                description: "echoes input".into(),
                parameters: serde_json::json!({}),
                required: vec![],
            }
        }

        fn plan_mode_allowed(&self) -> bool {
            true
        }

        async fn run(&self, _env: &InvocationEnv, call: Invocation) -> tl_domain::Result<ToolOutcome> {
            Ok(ToolOutcome::ok(call.input.to_string()))
        }
    }

    struct WriteOnly;

    #[async_trait::async_trait]
    impl Tool for WriteOnly {
        fn info(&self) -> ToolInfo {
            ToolInfo {
                name: "write".into(),
                description: "writes".into(),
                parameters: serde_json::json!({}),
                required: vec![],
            }
        }

        async fn run(&self, _env: &InvocationEnv, _call: Invocation) -> tl_domain::Result<ToolOutcome> {
            Ok(ToolOutcome::ok(""))
        }
    }

    fn env() -> InvocationEnv {
        InvocationEnv {
            session_id: SessionId::new("s1"),
            message_id: MessageId::new(),
            plan_mode: false,
            cancel: CancelToken::new(),
            permissions: Arc::new(AllowAll),
        }
    }

    #[test]
    fn registry_get_returns_registered_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo));
        assert!(reg.get("echo").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn available_filters_by_plan_mode() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo));
        reg.register(Arc::new(WriteOnly));
        assert_eq!(reg.available(false).len(), 2);
        let plan_tools = reg.available(true);
        assert_eq!(plan_tools.len(), 1);
        assert_eq!(plan_tools[0].info().name, "echo");
    }

    #[tokio::test]
    async fn run_invokes_tool_with_env() {
        let reg = {
            let mut r = ToolRegistry::new();
            r.register(Arc::new(Echo));
            r
        };
        let tool = reg.get("echo").unwrap();
        let outcome = tool
            .run(&env(), Invocation { id: "c1".into(), name: "echo".into(), input: serde_json::json!("hi") })
            .await
            .unwrap();
        assert_eq!(outcome.content, "\"hi\"");
    }
}
