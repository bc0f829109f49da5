mod config_file;

use agentlens_index::{default_session_log_directories, TraceIndex};
use agentlens_resolver::Resolver;
use agentlens_server::{build_router, run_heartbeat, AppState};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Local observability daemon for AI coding-agent sessions
#[derive(Debug, Parser)]
#[command(name = "agentlens", version, about)]
struct Args {
    /// Address to bind
    #[arg(long, env = "AGENTLENS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, env = "AGENTLENS_PORT", default_value_t = 8787)]
    port: u16,

    /// Configuration file (TOML); defaults to the platform config dir
    #[arg(long, env = "AGENTLENS_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path = config_file::resolve_config_path(args.config.as_deref())?;
    let mut config = config_file::load_config(&config_path)?;
    tracing::info!(config = %config_path.display(), "configuration loaded");

    // Nothing configured: index the well-known agent directories that
    // exist on this machine
    if config.sources.is_empty() && config.session_log_directories.is_empty() {
        config.session_log_directories = default_session_log_directories();
        tracing::info!(
            directories = config.session_log_directories.len(),
            "using default session log directories"
        );
    }

    let index = Arc::new(TraceIndex::new(config).context("building trace index")?);
    let resolver = Arc::new(Resolver::system());

    let refresh_handle = tokio::spawn(index.clone().run());
    let heartbeat_handle = tokio::spawn(run_heartbeat(index.clone()));

    let state = AppState::new(index.clone(), resolver);
    let router = build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(addr = %addr, "agentlens listening");

    let shutdown_index = index.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("SIGINT received, shutting down");
            shutdown_index.shutdown();
        })
        .await
        .context("serving")?;

    index.shutdown();
    let _ = refresh_handle.await;
    let _ = heartbeat_handle.await;
    Ok(())
}
