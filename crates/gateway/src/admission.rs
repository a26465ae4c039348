//! Non-blocking concurrency admission for the agent engine and summarizer
//! (§4.G "Concurrency admission", §5 "active-requests map", §3 "Active
//! request").
//!
//! Grounded on the teacher's `runtime/session_lock.rs` `SessionLockMap`,
//! but replacing its wait-based `Semaphore` (one queued waiter allowed)
//! with a fail-fast check-and-insert: the spec's admission rule is "fail
//! immediately with `SessionBusy`", not "queue one waiter".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tl_domain::Error;
use tl_tools::CancelToken;

/// Holds the admitted slot for one run. Dropping it frees the key so a
/// later run for the same session can be admitted.
pub struct AdmissionGuard {
    map: Arc<AdmissionMap>,
    key: String,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.map.inner.lock().remove(&self.key);
    }
}

/// `key -> CancelToken`, keyed by `SessionID` for primary runs and by
/// `SessionId::summarize_key()` for the summarizer (§3 "at most one
/// primary and one summarize handle per session at any time").
#[derive(Default)]
pub struct AdmissionMap {
    inner: Mutex<HashMap<String, CancelToken>>,
}

impl AdmissionMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomic check-and-insert. Fails with `Error::SessionBusy` if a
    /// handle for `key` already exists — no queueing, per spec.
    pub fn admit(self: &Arc<Self>, key: impl Into<String>) -> Result<(AdmissionGuard, CancelToken), Error> {
        let key = key.into();
        let mut guard = self.inner.lock();
        if guard.contains_key(&key) {
            return Err(Error::SessionBusy);
        }
        let token = CancelToken::new();
        guard.insert(key.clone(), token.clone());
        drop(guard);
        Ok((AdmissionGuard { map: self.clone(), key }, token))
    }

    /// Cancel the handle for `key`, if one is currently admitted. Returns
    /// whether a handle was found.
    pub fn cancel(&self, key: &str) -> bool {
        match self.inner.lock().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_admit_for_same_key_fails_busy() {
        let map = AdmissionMap::new();
        let (_guard, _token) = map.admit("s1").unwrap();
        let err = map.admit("s1").unwrap_err();
        assert!(matches!(err, Error::SessionBusy));
    }

    #[test]
    fn dropping_guard_frees_the_key() {
        let map = AdmissionMap::new();
        let (guard, _token) = map.admit("s1").unwrap();
        drop(guard);
        assert!(map.admit("s1").is_ok());
    }

    #[test]
    fn primary_and_summarize_keys_are_independent() {
        let map = AdmissionMap::new();
        let (_g1, _t1) = map.admit("s1").unwrap();
        assert!(map.admit("s1-summarize").is_ok());
    }

    #[test]
    fn cancel_marks_the_token_and_reports_presence() {
        let map = AdmissionMap::new();
        let (_guard, token) = map.admit("s1").unwrap();
        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());
        assert!(!map.cancel("unknown"));
    }
}
