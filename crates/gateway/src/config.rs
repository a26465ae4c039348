//! Gateway configuration struct (§1 ambient "Configuration").
//!
//! Loading mechanics (file discovery, env overlay, CLI flags) stay with
//! the excluded CLI/config layer; this is only the struct the core reads,
//! far smaller than the teacher's full `domain::config` tree since most
//! of that tree configures functionality this core doesn't carry (MCP,
//! skills, schedules, memory, auth).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-model cost rates, in USD per million tokens (§4.G "Usage accounting").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelRates {
    #[serde(default)]
    pub input_per_million: f64,
    #[serde(default)]
    pub output_per_million: f64,
    #[serde(default)]
    pub cache_read_per_million: f64,
    #[serde(default)]
    pub cache_creation_per_million: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// The values this core genuinely needs to be parameterized by (§1
/// ambient note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Heartbeat interval on each open stream (§4.D, §5 "Timeouts").
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Per-subscriber outbox capacity (§5 "Resource bounds").
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Engine output channel capacity (§4.G "Return a bounded output
    /// channel (capacity ~10)").
    #[serde(default = "default_engine_channel_capacity")]
    pub engine_channel_capacity: usize,
    /// Tool output truncation cap, in characters (§5 "Tool output").
    #[serde(default = "default_tool_output_cap")]
    pub tool_output_cap: usize,
    /// Default model id used when a run doesn't specify one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Per-model pricing used by usage accounting (§4.G).
    #[serde(default)]
    pub pricing: HashMap<String, ModelRates>,
    /// Emit OpenTelemetry traces in addition to stdout JSON logs (§1
    /// ambient "Logging & tracing").
    #[serde(default)]
    pub otel_enabled: bool,
}

fn default_heartbeat_secs() -> u64 {
    45
}

fn default_outbox_capacity() -> usize {
    crate::broker::OUTBOX_CAPACITY
}

fn default_engine_channel_capacity() -> usize {
    10
}

fn default_tool_output_cap() -> usize {
    30_000
}

fn default_model() -> String {
    "default".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            heartbeat_secs: default_heartbeat_secs(),
            outbox_capacity: default_outbox_capacity(),
            engine_channel_capacity: default_engine_channel_capacity(),
            tool_output_cap: default_tool_output_cap(),
            default_model: default_model(),
            pricing: HashMap::new(),
            otel_enabled: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn rates_for(&self, model: &str) -> ModelRates {
        self.pricing.get(model).copied().unwrap_or_default()
    }
}
