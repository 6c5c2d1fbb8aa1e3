// Concierge workflow server
//
// Bootstrap style (tracing init, env-driven config, axum binding) mirrored
// from everruns-api's main.rs. MCP transport wiring (StreamableHttpService +
// LocalSessionManager, nested under an axum Router) mirrored from the
// streamable-http rmcp example bundled in the reference pack. The stdio
// equivalent lives in examples/stock_workflow.rs: same ConciergeServer, same
// Engine, a different rmcp transport.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use concierge_core::{Config, Engine};
use concierge_state::AnyStateBackend;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concierge_server::ConciergeServer;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    state_backend: String,
}

async fn health(config: axum::extract::Extension<Arc<Config>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state_backend: config.0.state_backend_description(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concierge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("concierge-server starting...");

    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(state_backend = %config.state_backend_description(), "configuration loaded");
    let config = Arc::new(config);

    let state = AnyStateBackend::from_config(&config.state_backend)
        .await
        .context("failed to initialize state backend")?;

    let workflow = concierge_server::fixtures::stock_workflow();
    let engine = Arc::new(Engine::new(workflow, Arc::new(state)));

    let mcp_service = StreamableHttpService::new(
        {
            let engine = engine.clone();
            move || Ok(ConciergeServer::new(engine.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let app = Router::new()
        .route("/health", get(health))
        .layer(axum::Extension(config.clone()))
        .nest_service("/mcp", mcp_service)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
