//! `POST /stream/{sessionId}/message` (§6 "Message submit").
//!
//! Pure fan-out: the inbound dispatcher of §4.C describes what happens
//! to the content once the stream endpoint drains it; this handler's
//! only job is to validate the envelope and hand the raw string to the
//! broker. Unknown or disconnected sessions are not an error (best-
//! effort broadcast to zero subscribers), matching §6's "Unknown or
//! disconnected sessions are not an error here".

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use tl_domain::SessionId;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageSubmit {
    pub content: String,
}

#[derive(Debug, Serialize)]
struct BroadcastAck {
    status: &'static str,
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub async fn submit(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<MessageSubmit>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": err.to_string() })))
                .into_response();
        }
    };

    let session_id = SessionId::new(session_id);
    state.broker.broadcast(&session_id, body.content);

    (
        StatusCode::OK,
        Json(BroadcastAck { status: "broadcasted", session_id: session_id.as_str().to_owned() }),
    )
        .into_response()
}
