// crates/server/src/main.rs
//! Darkroom server binary.
//!
//! Binds the HTTP server immediately and spawns the retention sweeper as a
//! background task. Executors are expected to be wired up by whatever
//! embeds the router; the standalone binary serves observation and
//! control (list, get, cancel, resume, delete, SSE stream).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use darkroom_core::JobManager;
use darkroom_server::{create_app, AppState};

/// Default port for the server.
const DEFAULT_PORT: u16 = 47310;

/// Default retention for terminal jobs before the sweeper removes them.
const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;

/// How often the sweeper runs.
const SWEEP_INTERVAL_SECS: u64 = 10 * 60;

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("DARKROOM_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Get the terminal-job retention window from environment or use default.
fn get_retention() -> Duration {
    let secs = std::env::var("DARKROOM_RETENTION_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_RETENTION_SECS);
    Duration::from_secs(secs)
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    eprintln!("\n\u{1f4f7} darkroom v{}\n", env!("CARGO_PKG_VERSION"));

    let jobs = JobManager::new();
    let state = AppState::with_manager(jobs.clone());

    // Periodic retention sweep for terminal jobs. The manager never sweeps
    // on its own; this task is its external scheduler.
    let retention = get_retention();
    let sweeper = jobs.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            let removed = sweeper.cleanup(retention);
            if removed > 0 {
                tracing::info!(removed, "retention sweep removed terminal jobs");
            }
        }
    });

    let app = create_app(state);
    let port = get_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    eprintln!("  Listening on http://{addr}\n");
    tracing::info!(%addr, retention_secs = retention.as_secs(), "darkroom server started");

    axum::serve(listener, app).await?;
    Ok(())
}
