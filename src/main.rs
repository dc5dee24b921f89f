use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use lanradio::api::{build_router, AppState};
use lanradio::config::Config;
use lanradio::station::Broadcaster;

// LAN radio engine
//
//   - Scan the music folder into an id-tagged playlist
//   - Run one broadcaster loop (ffmpeg per track) shared by every listener
//   - Serve /stream plus a small JSON control API

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::parse();
    info!("music folder: {}", cfg.music_dir.display());
    if !cfg.music_dir.is_dir() {
        match std::fs::create_dir_all(&cfg.music_dir) {
            Ok(()) => info!("created missing music folder"),
            Err(e) => warn!("failed to create music folder: {e}"),
        }
    }

    let source = cfg.track_source();
    let station = Broadcaster::new(cfg.station_config());
    station.rescan(&source).await;
    station.ensure_running();

    let app = build_router(AppState { station: station.clone(), source });

    let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
    info!(
        "LAN radio engine v{} listening on http://{} (host {host})",
        env!("CARGO_PKG_VERSION"),
        cfg.bind
    );

    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(station))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C / SIGTERM after stopping the broadcaster, which closes
/// every listener stream so the server can drain.
async fn shutdown_signal(station: Broadcaster) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
    if let Some(handle) = station.shutdown() {
        if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
            warn!("broadcaster did not stop within 2s");
        }
    }
}
