//! Procyon daemon binary
//!
//! Loads the configuration, launches the supervised processes, and serves
//! the HTTP/JSON control surface until interrupted.

use clap::Parser;
use procyon_daemon::bootstrap::bootstrap;
use procyon_daemon::http::{router, AppState};
use procyon_daemon::DaemonError;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "procyond", about = "Procyon process supervisor daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "procyon.toml")]
    config: PathBuf,

    /// Address for the HTTP control surface
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Override the configured database path
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> procyon_daemon::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting procyond with config {:?}", args.config);
    let handle = bootstrap(&args.config, args.db_path.as_deref()).await?;

    let app = router(AppState {
        supervisor: handle.supervisor.clone(),
    });

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .map_err(|e| DaemonError::Server(format!("failed to bind {}: {e}", args.bind)))?;
    info!("control surface listening on {}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            info!("received ctrl-c, shutting down");
        })
        .await
        .map_err(|e| DaemonError::Server(e.to_string()))?;

    handle.shutdown().await;
    info!("procyond stopped");
    Ok(())
}
