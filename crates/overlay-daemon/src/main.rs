mod reconcile;
mod render;
mod server;
mod spotify;
mod token;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use overlay_core::config::{self, Config, Credentials};
use overlay_core::model::ReconciliationContext;

use crate::spotify::SpotifyClient;
use crate::token::TokenManager;

/// Per-request ceiling so a hung upstream call cannot stall a cycle
/// indefinitely.
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File logging under the platform data dir
    let data_dir = config::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,overlay_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Missing credentials are fatal: nothing useful can be served without
    // an OAuth app to authorize against.
    let credentials =
        Credentials::from_env().context("Spotify credentials missing, refusing to start")?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("failed to build HTTP client")?;

    let redirect_uri = format!("http://localhost:{}/callback", config.server.port);
    let session = server::SessionState {
        tokens: TokenManager::new(http.clone(), credentials, redirect_uri),
        ctx: ReconciliationContext::new(config.features.audio_features, config.features.genre),
        pending_auth_state: None,
    };

    let state = server::AppState {
        config: Arc::new(config.clone()),
        spotify: SpotifyClient::new(http),
        session: Arc::new(Mutex::new(session)),
    };

    let app = server::router(state);
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            // The shell may start the daemon redundantly; an existing
            // instance on the port already serves the widget.
            info!("Port {} already in use, another instance is serving", config.server.port);
            return Ok(());
        }
        Err(e) => anyhow::bail!("failed to bind {addr}: {e}"),
    };

    info!("Overlay server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. In-flight cycles are simply abandoned;
/// nothing persisted can be corrupted.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
