pub mod inbound;
pub mod stream;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// The full API surface this core exposes (§6): the stream endpoint and
/// the message-submit endpoint. Everything else the teacher's gateway
/// served (chat completions, skills, schedules, memory, nodes, …) is
/// out of scope for this runtime core.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stream", get(stream::stream))
        .route("/stream/:session_id/message", post(inbound::submit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
