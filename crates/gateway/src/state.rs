//! Application state shared across handlers (axum's `State` extractor).
//!
//! Grounded on the teacher's `state.rs` `AppState` (a flat bag of
//! `Arc`-wrapped subsystems, cheaply `Clone`-able per request), trimmed
//! to the handful of subsystems this core's two endpoints actually use.

use std::sync::Arc;

use crate::broker::Broker;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub engine: Arc<Engine>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<GatewayConfig>,
}
