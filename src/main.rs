use std::net::SocketAddr;
use iiif_cache::{config::ProxyConfig, router, scratch, AppState};

/// iiif-cache server entry point.
///
/// Initializes tracing, loads and validates configuration, then serves IIIF
/// requests until Ctrl-C. Pending background cache writes are awaited before
/// the process exits.
///
/// # Configuration
/// Environment variables, see [`ProxyConfig::from_env`]. At minimum
/// `IIIF_DEFAULT_BUCKET` must be set. `RUST_LOG` controls verbosity
/// (default: "iiif_cache=debug,tower_http=debug").
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iiif_cache=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting iiif-cache server");

    let cfg = ProxyConfig::from_env()?;
    tracing::info!(
        storage = %cfg.storage,
        default_bucket = %cfg.default_bucket,
        include_stage = cfg.include_stage,
        "configuration loaded"
    );

    if let Err(e) = scratch::clear_dir(&cfg.scratch_root).await {
        tracing::warn!(error = %e, "could not clear scratch directory");
    }

    let port = cfg.port;
    let state = AppState::from_config(cfg)?;
    let app = router(state.clone());

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Waiting for background cache writes");
    state.orchestrator().wait_for_write_backs().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
