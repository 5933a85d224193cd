//! query-gateway - SQL over HTTP for PostgreSQL
//!
//! This is the composition root that wires together all the components.

use query_gateway::config::{debug_enabled, load_config};
use query_gateway::{
    HttpServer, LifecycleController, PoolManager, PostgresPoolFactory, QueryGateway,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging before config so config errors are visible
    let log_level = if debug_enabled() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    if cfg.container_setup {
        tracing::warn!("container setup mode: using dummy database settings");
    }

    tracing::info!(
        "starting query-gateway listen={} database={:?}",
        cfg.listen_addr,
        cfg.database
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapter and pool holder
    let factory = Arc::new(PostgresPoolFactory::new());
    let pool_manager = Arc::new(PoolManager::new(cfg.database.clone(), factory)?);

    // 2. Application service
    let gateway = Arc::new(QueryGateway::new(pool_manager.clone()));

    // 3. Lifecycle and inbound adapter
    let lifecycle = LifecycleController::new(pool_manager, cfg.restart_after(), cfg.grace_delay());
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    let server = HttpServer::new(gateway);
    let shutdown = lifecycle.subscribe();

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(listener, shutdown).await {
            tracing::error!("http server failed: {:#}", e);
        }
    });

    let code = lifecycle.run().await;
    server_task.abort();

    std::process::exit(code)
}
