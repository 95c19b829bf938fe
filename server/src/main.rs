//! Standalone `ptyhub-server` binary. Hosts an empty session pool and
//! serves it over HTTP/WebSocket; an embedding process (the desktop owner,
//! out of scope per spec.md §1) spawns agents into the same pool via the
//! `ptyhub-core` API before or while this listener runs.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ptyhub_core::collab::DesktopSink;
use ptyhub_core::session::SessionPool;

use ptyhub_server::app::AppState;
use ptyhub_server::{auth, build_router, cli::Args, discovery, metadata};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let token = auth::generate_token();

    let last_line_sink = Arc::new(metadata::LastLineSink::new());
    let pool = SessionPool::with_config(
        Arc::clone(&last_line_sink) as Arc<dyn DesktopSink>,
        args.ring_capacity,
        ptyhub_core::session::DEFAULT_INTERACTIVE_THRESHOLD,
    );
    let metadata_provider: Arc<dyn ptyhub_core::collab::AgentMetadataProvider> =
        metadata::PoolMetadata::new(Arc::clone(&pool), Arc::clone(&last_line_sink));

    let state = Arc::new(AppState::new(Arc::clone(&pool), metadata_provider, token.clone(), args.static_dir.clone(), args.max_clients));

    let urls = discovery::advertised_urls(args.port, &token);
    tracing::info!(primary = %urls.primary, lan = ?urls.lan, mesh = ?urls.mesh, "ptyhub-server starting");

    let addr = std::net::SocketAddr::from((args.bind, args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let app = build_router(state.clone());
    let shutdown_pool = Arc::clone(&pool);
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, killing all sessions");
            shutdown_pool.kill_all();
        })
        .await?;

    Ok(())
}
