//! Shared error type used across the turnloop crates (§7 taxonomy).
//!
//! `SessionBusy` and `PermissionDenied` are distinguished variants rather
//! than strings so callers can `match` on them instead of parsing a
//! message (ambient "Error type shape" note in SPEC_FULL.md §7).

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// §7 kind 1 — admission failure: another run (or summarize) is
    /// already active for this session.
    #[error("session is busy")]
    SessionBusy,

    /// §7 kind 5 — distinguished from a normal tool error; terminates the
    /// turn with finish reason `permission_denied`.
    #[error("permission denied")]
    PermissionDenied { reason: Option<String> },

    /// §7 kind 3 — provider-level failure surfaced as a stream `error`.
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// §7 kind 6 — cooperative cancellation observed at a checkpoint.
    #[error("canceled")]
    Canceled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
