//! Permission service and cooperative cancellation (§4.E, §4.G, §9).
//!
//! Grounded on the gateway's `approval.rs` (pending-approval store) and
//! `cancel.rs` (atomic-bool token). No parent/child session relationship
//! exists in this spec, so the cascading-group machinery in `cancel.rs`
//! is dropped; a bare per-session token is enough.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// A cancellation flag checked at tool-call boundaries and stream
/// checkpoints (§4.G "Check cancellation").
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A request a tool makes before performing a sensitive action (§4.E
/// "consults a `Permission` service").
#[derive(Debug, Clone, Serialize)]
pub struct PermissionRequest {
    pub session_id: String,
    pub path: Option<String>,
    pub tool_name: String,
    pub action: String,
    pub description: String,
    pub params: Value,
}

/// The decision the service returns. A denial carries an optional
/// human-readable reason, surfaced on the `Error::PermissionDenied`
/// variant the engine treats specially.
pub enum PermissionDecision {
    Allowed,
    Denied { reason: Option<String> },
}

/// Tools consult this before acting; the engine never calls it
/// directly (§4.E: the check lives inside `Run`, not the loop).
#[async_trait::async_trait]
pub trait PermissionService: Send + Sync {
    async fn check(&self, request: PermissionRequest) -> PermissionDecision;
}

/// A service that allows everything — the default for the reference
/// tools and for tests that don't exercise the approval path.
pub struct AllowAll;

#[async_trait::async_trait]
impl PermissionService for AllowAll {
    async fn check(&self, _request: PermissionRequest) -> PermissionDecision {
        PermissionDecision::Allowed
    }
}

/// A service that denies everything, for exercising the
/// `PermissionDenied` path in engine tests.
pub struct DenyAll {
    pub reason: Option<String>,
}

#[async_trait::async_trait]
impl PermissionService for DenyAll {
    async fn check(&self, _request: PermissionRequest) -> PermissionDecision {
        PermissionDecision::Denied { reason: self.reason.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_starts_uncancelled_and_is_sticky() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_token_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn allow_all_always_allows() {
        let req = PermissionRequest {
            session_id: "s1".into(),
            path: None,
            tool_name: "bash".into(),
            action: "execute".into(),
            description: "run a command".into(),
            params: serde_json::json!({}),
        };
        assert!(matches!(AllowAll.check(req).await, PermissionDecision::Allowed));
    }

    #[tokio::test]
    async fn deny_all_carries_reason() {
        let svc = DenyAll { reason: Some("no".into()) };
        let req = PermissionRequest {
            session_id: "s1".into(),
            path: None,
            tool_name: "bash".into(),
            action: "execute".into(),
            description: "run a command".into(),
            params: serde_json::json!({}),
        };
        match svc.check(req).await {
            PermissionDecision::Denied { reason } => assert_eq!(reason.as_deref(), Some("no")),
            _ => panic!("expected denial"),
        }
    }
}
