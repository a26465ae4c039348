use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tl_gateway::api;
use tl_gateway::broker::Broker;
use tl_gateway::config::GatewayConfig;
use tl_gateway::dispatch::Dispatcher;
use tl_gateway::engine::Engine;
use tl_gateway::provider_stub::LoopbackProvider;
use tl_gateway::state::AppState;
use tl_gateway::summarizer::Summarizer;
use tl_sessions::InMemoryStore;
use tl_tools::{
    AllowAll, GlobTool, ListTool, PlanExitTool, SearchTool, TodoWriteTool, ToolRegistry, ViewTool, WriteFileTool,
};

/// Structured JSON logging (§1 ambient "Logging & tracing"), grounded
/// on the teacher's `main.rs::init_tracing`; additionally layers an
/// OTLP trace exporter when `otel_enabled` is set, matching the
/// teacher's declared (if unwired, in the retrieved pack) OpenTelemetry
/// stack.
fn init_tracing(config: &GatewayConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tl_gateway=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if config.otel_enabled {
        match opentelemetry_otlp::SpanExporter::builder().with_tonic().build() {
            Ok(exporter) => {
                let provider = opentelemetry_sdk::trace::TracerProvider::builder()
                    .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                    .build();
                let tracer = opentelemetry::trace::TracerProvider::tracer(&provider, "turnloopd");
                registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
            }
            Err(err) => {
                registry.init();
                tracing::warn!(%err, "failed to initialize OTLP exporter, continuing without it");
            }
        }
    } else {
        registry.init();
    }
}

fn load_config() -> GatewayConfig {
    match env::var("TURNLOOP_CONFIG").ok().and_then(|path| std::fs::read_to_string(path).ok()) {
        Some(raw) => match GatewayConfig::from_toml_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, "failed to parse TURNLOOP_CONFIG, using defaults");
                GatewayConfig::default()
            }
        },
        None => GatewayConfig::default(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config());
    init_tracing(&config);
    tracing::info!("turnloopd starting");

    let workspace_root = env::var("TURNLOOP_WORKSPACE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));

    let session_store: Arc<dyn tl_sessions::SessionStore> = Arc::new(InMemoryStore::new());
    let message_store: Arc<dyn tl_sessions::MessageStore> = Arc::new(InMemoryStore::new());
    let file_history: Arc<dyn tl_sessions::FileHistoryStore> = Arc::new(InMemoryStore::new());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ListTool { workspace_root: workspace_root.clone() }));
    registry.register(Arc::new(ViewTool { workspace_root: workspace_root.clone() }));
    registry.register(Arc::new(GlobTool { workspace_root: workspace_root.clone() }));
    registry.register(Arc::new(SearchTool { workspace_root: workspace_root.clone() }));
    registry.register(Arc::new(TodoWriteTool::default()));
    registry.register(Arc::new(PlanExitTool));
    registry.register(Arc::new(WriteFileTool::new(workspace_root, file_history)));
    let tools = Arc::new(registry);

    let permissions: Arc<dyn tl_tools::PermissionService> = Arc::new(AllowAll);
    let provider: Arc<dyn tl_providers::LlmProvider> = Arc::new(LoopbackProvider);

    let engine = Engine::new(
        session_store.clone(),
        message_store.clone(),
        tools,
        permissions,
        provider.clone(),
        config.clone(),
    );
    let summarizer = Summarizer::new(session_store, message_store, provider, engine.admission(), config.clone());
    let commands = Arc::new(tl_gateway::commands::CommandRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), summarizer, commands));
    let broker = Broker::new();

    let state = AppState { broker, engine, dispatcher, config: config.clone() };

    let app = api::router().with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
