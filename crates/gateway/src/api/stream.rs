//! `GET /stream?sessionId=<id>` (§4.D).
//!
//! The handler is the sole writer to this subscriber's transport; every
//! other producer (the dispatcher, the engine, the summarizer) writes
//! to an in-process channel that this loop drains and serializes.
//! Grounded on the teacher's `api/chat.rs` SSE endpoint (`Sse::new` over
//! a `Stream` built from a `run_turn` receiver), adapted to the fixed
//! three-way select over outbox/heartbeat/dispatch-output this spec
//! calls for, and to hand-built wire records (`Event::to_sse_record`)
//! instead of axum's own SSE event builder, since the codec is already
//! owned by `tl_domain::Event`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::Response;
use serde::Deserialize;

use tl_domain::event::HeartbeatKind;
use tl_domain::{Event, SessionId};

use crate::broker::Connection;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(body)
        .expect("static headers are valid")
}

fn single_record_response(event: &Event) -> Response {
    let record = event.to_sse_record().unwrap_or_else(|_| "event: error\ndata: {}\n\n".to_owned());
    sse_response(Body::from(record))
}

/// Drop guard that performs §4.D step 5 ("On loop exit, signal Done,
/// close the outbox, and unregister") regardless of whether the loop
/// exits normally or the body future is dropped mid-stream because the
/// client disconnected (§5 "Client disconnect: cancel the session's
/// active agent request and return").
struct ConnectionGuard {
    state: AppState,
    session_id: SessionId,
    conn_id: u64,
    done: Arc<AtomicBool>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        self.state.broker.unregister(&self.session_id, self.conn_id);
        self.state.engine.cancel(&self.session_id);
    }
}

pub async fn stream(State(state): State<AppState>, Query(query): Query<StreamQuery>) -> Response {
    let Some(raw_session_id) = query.session_id else {
        return single_record_response(&Event::error("Missing sessionId parameter"));
    };
    if raw_session_id.trim().is_empty() {
        return single_record_response(&Event::error("Missing sessionId parameter"));
    }
    let session_id = SessionId::new(raw_session_id);

    let (conn, mut outbox_rx, done) = Connection::new(session_id.clone());
    let conn_id = conn.id();
    state.broker.register(conn);

    let guard = ConnectionGuard { state: state.clone(), session_id: session_id.clone(), conn_id, done: done.clone() };

    let body_stream = stream! {
        let _guard = guard;
        yield Ok::<_, std::io::Error>(Bytes::from(
            Event::Connected { session_id: session_id.as_str().to_owned() }
                .to_sse_record()
                .expect("Connected serializes"),
        ));

        let mut heartbeat = tokio::time::interval(Duration::from_secs(state.config.heartbeat_secs));
        heartbeat.tick().await; // first tick fires immediately; consume it

        let (events_tx, mut events_rx) = tokio::sync::mpsc::channel::<Event>(state.config.engine_channel_capacity);
        let dispatcher = state.dispatcher.clone();
        let loop_session_id = session_id.clone();

        loop {
            tokio::select! {
                raw = outbox_rx.recv() => {
                    match raw {
                        Some(raw) => {
                            let dispatcher = dispatcher.clone();
                            let tx = events_tx.clone();
                            let sid = loop_session_id.clone();
                            tokio::spawn(async move {
                                dispatcher.dispatch(&sid, &raw, &tx).await;
                            });
                        }
                        None => break,
                    }
                }
                Some(event) = events_rx.recv() => {
                    if let Ok(record) = event.to_sse_record() {
                        yield Ok(Bytes::from(record));
                    }
                }
                _ = heartbeat.tick() => {
                    let record = Event::Heartbeat { kind: HeartbeatKind::Ping }
                        .to_sse_record()
                        .expect("Heartbeat serializes");
                    yield Ok(Bytes::from(record));
                }
            }
        }
    };

    sse_response(Body::from_stream(body_stream))
}
