//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that open the fact
//! engine and wire it into a running server. Both run a background task that
//! purges expired cache rows.

use std::time::Duration;

use anyhow::Result;
use rmcp::ServiceExt;

use verity::config::VerityConfig;
use verity::engine::FactEngine;

use crate::tools::VerityTools;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

fn spawn_cache_purge(engine: FactEngine) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = engine.purge_expired_cache().await {
                tracing::warn!(error = %e, "cache purge failed");
            }
        }
    })
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: VerityConfig) -> Result<()> {
    tracing::info!("starting Verity MCP server on stdio");

    let engine = FactEngine::open(config)?;
    let purge = spawn_cache_purge(engine.clone());

    let tools = VerityTools::new(engine);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    purge.abort();
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: VerityConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    tracing::info!(addr = %bind_addr, "starting Verity MCP server on HTTP");

    let engine = FactEngine::open(config)?;
    let purge = spawn_cache_purge(engine.clone());

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(VerityTools::new(engine.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    purge.abort();
    Ok(())
}
