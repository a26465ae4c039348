//! Session/message store contract (§4.J) and one reference implementation.
//!
//! The persistence *layer* is out of scope (SPEC_FULL.md §1); this crate
//! only defines the interface the engine assumes and a reference
//! in-process implementation so the engine is testable end to end.
//! Grounded on `SessionStore`'s JSON-file + `RwLock<HashMap>` idiom from
//! the teacher, restructured around the spec's `Session` fields.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use tl_domain::{Message, MessageId, Session, SessionId};

/// A single recorded version of a file, used by the read-before-write
/// invariant in edit/write tools (§4.E, §9 Open Question).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileVersion {
    pub path: String,
    pub content: String,
    pub recorded_at: chrono::DateTime<Utc>,
}

/// Operations the engine assumes (§4.J).
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &SessionId) -> Option<Session>;
    /// Create-on-demand: returns the existing session or creates and
    /// persists a fresh one (§3 Session "Lifecycle: created by the store
    /// on demand").
    fn get_or_create(&self, id: &SessionId) -> Session;
    fn save(&self, session: &Session);
}

/// Operations the engine assumes over a session's message history.
pub trait MessageStore: Send + Sync {
    fn list(&self, session_id: &SessionId) -> Vec<Message>;
    fn append(&self, message: Message);
    fn get(&self, session_id: &SessionId, id: MessageId) -> Option<Message>;
    /// Replace a message in place (used when the engine finalizes an
    /// assistant message's finish reason after it was already appended
    /// as an in-progress record, and when throttled tool-call-delta
    /// persistence updates a message's parts — §4.G "throttled
    /// persistence is permitted").
    fn update(&self, message: Message);
}

/// File-history operations used by edit/write-style tools (§4.J
/// `GetByPathAndSession` / `CreateVersion`).
pub trait FileHistoryStore: Send + Sync {
    fn get_last_version(&self, session_id: &SessionId, path: &str) -> Option<FileVersion>;
    fn create_version(&self, session_id: &SessionId, version: FileVersion);
}

struct Inner {
    sessions: HashMap<SessionId, Session>,
    messages: HashMap<SessionId, Vec<Message>>,
    file_versions: HashMap<(SessionId, String), Vec<FileVersion>>,
}

/// In-process store guarded by a single `RwLock`, with an optional
/// JSON-file flush on every mutation for durability across restarts of
/// a single instance (§4.J: "no durability contract beyond reads after
/// successful writes observe the write").
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    flush_path: Option<PathBuf>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct Snapshot {
    sessions: Vec<Session>,
    messages: Vec<(SessionId, Vec<Message>)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                messages: HashMap::new(),
                file_versions: HashMap::new(),
            }),
            flush_path: None,
        }
    }

    /// Load from (and flush to) a JSON file at the given path, mirroring
    /// the teacher's `sessions.json` persistence idiom.
    pub fn with_flush_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let mut store = Self::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if let Ok(snapshot) = serde_json::from_str::<Snapshot>(&raw) {
                let mut inner = store.inner.write();
                for session in snapshot.sessions {
                    inner.sessions.insert(session.id.clone(), session);
                }
                for (id, msgs) in snapshot.messages {
                    inner.messages.insert(id, msgs);
                }
            }
        }
        store.flush_path = Some(path);
        Ok(store)
    }

    fn flush(&self) {
        let Some(path) = &self.flush_path else { return };
        let inner = self.inner.read();
        let snapshot = Snapshot {
            sessions: inner.sessions.values().cloned().collect(),
            messages: inner.messages.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        drop(inner);
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            if let Err(err) = std::fs::write(path, json) {
                tracing::warn!(error = %err, path = %path.display(), "failed to flush session store");
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemoryStore {
    fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner.read().sessions.get(id).cloned()
    }

    fn get_or_create(&self, id: &SessionId) -> Session {
        {
            let inner = self.inner.read();
            if let Some(session) = inner.sessions.get(id) {
                return session.clone();
            }
        }
        let session = Session::new(id.clone());
        self.inner.write().sessions.insert(id.clone(), session.clone());
        self.flush();
        session
    }

    fn save(&self, session: &Session) {
        let mut session = session.clone();
        session.updated_at = Utc::now();
        self.inner.write().sessions.insert(session.id.clone(), session);
        self.flush();
    }
}

impl MessageStore for InMemoryStore {
    fn list(&self, session_id: &SessionId) -> Vec<Message> {
        self.inner.read().messages.get(session_id).cloned().unwrap_or_default()
    }

    fn append(&self, message: Message) {
        self.inner
            .write()
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message);
        self.flush();
    }

    fn get(&self, session_id: &SessionId, id: MessageId) -> Option<Message> {
        self.inner
            .read()
            .messages
            .get(session_id)?
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    fn update(&self, message: Message) {
        let mut inner = self.inner.write();
        if let Some(list) = inner.messages.get_mut(&message.session_id) {
            if let Some(slot) = list.iter_mut().find(|m| m.id == message.id) {
                *slot = message;
            }
        }
        drop(inner);
        self.flush();
    }
}

impl FileHistoryStore for InMemoryStore {
    fn get_last_version(&self, session_id: &SessionId, path: &str) -> Option<FileVersion> {
        self.inner
            .read()
            .file_versions
            .get(&(session_id.clone(), path.to_owned()))
            .and_then(|versions| versions.last().cloned())
    }

    fn create_version(&self, session_id: &SessionId, version: FileVersion) {
        self.inner
            .write()
            .file_versions
            .entry((session_id.clone(), version.path.clone()))
            .or_default()
            .push(version);
        self.flush();
    }
}

impl InMemoryStore {
    /// Every recorded version for a path, oldest first. Not part of the
    /// `FileHistoryStore` contract (callers only ever need the last one);
    /// exposed for inspection and tests.
    pub fn version_history(&self, session_id: &SessionId, path: &str) -> Vec<FileVersion> {
        self.inner.read().file_versions.get(&(session_id.clone(), path.to_owned())).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::new("s1")
    }

    #[test]
    fn get_or_create_returns_same_session_on_second_call() {
        let store = InMemoryStore::new();
        let a = store.get_or_create(&sid());
        let b = store.get_or_create(&sid());
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_at, b.created_at);
    }

    #[test]
    fn save_overwrites_existing_session() {
        let store = InMemoryStore::new();
        let mut session = store.get_or_create(&sid());
        session.cost = 1.5;
        store.save(&session);
        assert_eq!(store.get(&sid()).unwrap().cost, 1.5);
    }

    #[test]
    fn message_append_and_list_preserve_order() {
        let store = InMemoryStore::new();
        let m1 = Message::user(sid(), "first");
        let m2 = Message::user(sid(), "second");
        store.append(m1.clone());
        store.append(m2.clone());
        let listed = store.list(&sid());
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, m1.id);
        assert_eq!(listed[1].id, m2.id);
    }

    #[test]
    fn message_update_replaces_in_place() {
        let store = InMemoryStore::new();
        let mut msg = Message::assistant_empty(sid(), "gpt");
        store.append(msg.clone());
        msg.finish(tl_domain::FinishReason::EndTurn);
        store.update(msg.clone());
        let fetched = store.get(&sid(), msg.id).unwrap();
        assert_eq!(fetched.finish_reason, Some(tl_domain::FinishReason::EndTurn));
    }

    #[test]
    fn file_history_returns_none_before_any_version_recorded() {
        let store = InMemoryStore::new();
        assert!(store.get_last_version(&sid(), "a.txt").is_none());
    }

    #[test]
    fn file_history_returns_last_recorded_version() {
        let store = InMemoryStore::new();
        store.create_version(
            &sid(),
            FileVersion { path: "a.txt".into(), content: "v1".into(), recorded_at: Utc::now() },
        );
        store.create_version(
            &sid(),
            FileVersion { path: "a.txt".into(), content: "v2".into(), recorded_at: Utc::now() },
        );
        let last = store.get_last_version(&sid(), "a.txt").unwrap();
        assert_eq!(last.content, "v2");
    }

    #[test]
    fn flush_path_round_trips_sessions_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        {
            let store = InMemoryStore::with_flush_path(&path).unwrap();
            store.get_or_create(&sid());
        }
        let reloaded = InMemoryStore::with_flush_path(&path).unwrap();
        assert!(reloaded.get(&sid()).is_some());
    }
}
