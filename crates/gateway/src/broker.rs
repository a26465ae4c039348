//! Session registry & fan-out broker (§4.B).
//!
//! Grounded on the teacher's `runtime/runs.rs`, whose
//! `event_channels: RwLock<HashMap<Uuid, broadcast::Sender<RunEvent>>>`
//! lazily creates a channel per key and fans out to every subscriber. This
//! broker adapts that shape from a shared `tokio::sync::broadcast`
//! (lossy-oldest under pressure) to per-`Connection` bounded `mpsc` +
//! `try_send` (drop-newest), matching §4.B's exact slow-consumer policy:
//! never block the producer, drop only for the lagging subscriber.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tl_domain::SessionId;

/// Bounded outbox capacity per subscriber (§5 "Resource bounds").
pub const OUTBOX_CAPACITY: usize = 100;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A registered subscriber (§3 "Connection (subscriber)"). The stream
/// endpoint owns the `mpsc::Receiver` half and the `closed` flag; the
/// broker only ever holds this non-owning clone of the sender for
/// non-blocking delivery (§9 "Ownership of the write side").
#[derive(Clone)]
pub struct Connection {
    id: u64,
    session_id: SessionId,
    sender: mpsc::Sender<String>,
    /// Racing signal against `Broadcast`'s non-blocking send (§3 "Done:
    /// one-shot signal"). The channel's own closed state already implies
    /// this once the receiver is dropped; the flag lets `unregister`
    /// short-circuit broadcasts that arrive after close without waiting
    /// for the channel to report it.
    done: Arc<AtomicBool>,
}

impl Connection {
    /// Build a fresh connection and its owning receiver half. The caller
    /// (the stream endpoint) keeps the receiver and the returned `done`
    /// flag; the `Connection` value is what gets registered in the broker.
    pub fn new(session_id: SessionId) -> (Self, mpsc::Receiver<String>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let done = Arc::new(AtomicBool::new(false));
        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            session_id,
            sender: tx,
            done: done.clone(),
        };
        (conn, rx, done)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Identity used by `Broker::unregister` (§4.D step 5).
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Per-session subscriber registry (§4.B). Reads (`broadcast`) are
/// frequent; writes (`register`/`unregister`) are rare, hence the
/// reader-writer lock.
#[derive(Default)]
pub struct Broker {
    sessions: RwLock<std::collections::HashMap<SessionId, Vec<Connection>>>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// O(1) amortised append (§4.B `Register`).
    pub fn register(&self, conn: Connection) {
        self.sessions.write().entry(conn.session_id.clone()).or_default().push(conn);
    }

    /// Remove by identity; drop the map entry once the list is empty
    /// (§4.B `Unregister`).
    pub fn unregister(&self, session_id: &SessionId, conn_id: u64) {
        let mut sessions = self.sessions.write();
        if let Some(list) = sessions.get_mut(session_id) {
            list.retain(|c| c.id != conn_id);
            if list.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    /// Non-blocking fan-out. Never blocks the producer and never blocks
    /// other subscribers; a full or closed outbox drops the message for
    /// that subscriber only (§4.B `Broadcast`, §8 "outbox overflow").
    pub fn broadcast(&self, session_id: &SessionId, raw: String) {
        let subscribers = match self.sessions.read().get(session_id) {
            Some(list) => list.clone(),
            None => return,
        };
        for conn in subscribers {
            if conn.done.load(Ordering::Acquire) {
                continue;
            }
            // try_send is the non-blocking send the spec calls for; a
            // `Full` or `Closed` error both mean "drop for this
            // subscriber", which is exactly what we want to do anyway.
            let _ = conn.sender.try_send(raw.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::new("s1")
    }

    #[tokio::test]
    async fn broadcast_delivers_to_registered_subscriber() {
        let broker = Broker::new();
        let (conn, mut rx, _done) = Connection::new(sid());
        broker.register(conn);
        broker.broadcast(&sid(), "hello".into());
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn broadcast_to_unknown_session_is_a_no_op() {
        let broker = Broker::new();
        broker.broadcast(&sid(), "hello".into());
    }

    #[tokio::test]
    async fn unregister_removes_subscriber_and_empties_map_entry() {
        let broker = Broker::new();
        let (conn, _rx, _done) = Connection::new(sid());
        let conn_id = conn.id;
        broker.register(conn);
        broker.unregister(&sid(), conn_id);
        assert!(broker.sessions.read().get(&sid()).is_none());
    }

    #[tokio::test]
    async fn full_outbox_drops_messages_for_that_subscriber_only() {
        let broker = Broker::new();
        let (conn, mut rx, _done) = Connection::new(sid());
        broker.register(conn);
        for i in 0..(OUTBOX_CAPACITY + 10) {
            broker.broadcast(&sid(), format!("msg{i}"));
        }
        // The outbox holds at most OUTBOX_CAPACITY; draining never panics
        // and never yields more than what was buffered.
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert!(drained <= OUTBOX_CAPACITY);
    }

    #[tokio::test]
    async fn done_flag_suppresses_further_delivery() {
        let broker = Broker::new();
        let (conn, mut rx, done) = Connection::new(sid());
        broker.register(conn);
        done.store(true, Ordering::Release);
        broker.broadcast(&sid(), "late".into());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn two_subscribers_of_same_session_both_receive() {
        let broker = Broker::new();
        let (c1, mut r1, _d1) = Connection::new(sid());
        let (c2, mut r2, _d2) = Connection::new(sid());
        broker.register(c1);
        broker.register(c2);
        broker.broadcast(&sid(), "fanout".into());
        assert_eq!(r1.recv().await.unwrap(), "fanout");
        assert_eq!(r2.recv().await.unwrap(), "fanout");
    }
}
