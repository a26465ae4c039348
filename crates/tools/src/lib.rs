//! Tool contract, permission service, and reference test-fixture tools (§4.E).

pub mod contract;
pub mod fixtures;
pub mod permission;

pub use contract::{Invocation, InvocationEnv, Tool, ToolInfo, ToolOutcome, ToolRegistry};
pub use fixtures::{GlobTool, ListTool, PlanExitTool, ReadTimes, SearchTool, TodoWriteTool, ViewTool, WriteFileTool};
pub use permission::{AllowAll, CancelToken, DenyAll, PermissionDecision, PermissionRequest, PermissionService};
