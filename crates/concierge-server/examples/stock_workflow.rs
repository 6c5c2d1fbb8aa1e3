// Hosts the canonical stock-trading fixture workflow over stdio instead of
// streamable-HTTP, using the exact same `ConciergeServer`/`Engine` pairing
// `main.rs` nests under axum. Demonstrates that the protocol adapter depends
// only on `concierge_core::EngineApi`, not on any one transport.

use std::sync::Arc;

use concierge_core::{Engine, EngineApi, InMemoryState};
use concierge_server::ConciergeServer;
use rmcp::transport::stdio;
use rmcp::ServiceExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let workflow = concierge_server::fixtures::stock_workflow();
    let engine: Arc<dyn EngineApi> = Arc::new(Engine::new(workflow, Arc::new(InMemoryState::new())));

    tracing::info!("concierge-server (stdio) starting...");
    let service = ConciergeServer::new(engine).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
