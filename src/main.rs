use std::{net::SocketAddr, path::Path};

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use panal::config::{Config, CONFIG_FILE};
use panal::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(Path::new(CONFIG_FILE));

    FmtSubscriber::builder()
        .with_max_level(config.tracing_level())
        .with_target(false)
        .init();

    std::fs::create_dir_all(&config.data_dir)?;

    // A URL on the command line takes precedence over the configured target.
    let target = std::env::args().nth(1).or_else(|| config.target_url.clone());
    let port = config.active_ports.first().copied().unwrap_or(8080);

    let state = AppState::new(config);

    if let Some(url) = target {
        match state.cloner.clone_site(&url).await {
            Ok(artifact) => *state.artifact.write().await = Some(artifact),
            Err(e) => error!(error = %e, "startup clone failed, serving load-error page"),
        }
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "honeypot listening");

    server::serve(listener, state, shutdown_signal()).await?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received, draining in-flight requests");
    }
}
