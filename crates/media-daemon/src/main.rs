//! media-daemon: indexes a media directory and serves its metadata.
//!
//! Keeps one record per file in the data directory, follows filesystem
//! changes, and pushes every change to SSE and WebSocket clients.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use media_daemon::http::{AppState, router};
use media_daemon::{Config, EventServer};
use media_store::{Collection, JsonFileStorage, Media, MemStorage, Reconciler, Storage, UrlMapper};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    info!("Starting media-daemon");
    info!("Data directory: {:?}", config.data_dir);
    info!("Public URL: {}", config.public_url);

    let storage: Arc<dyn Storage> = match &config.store {
        Some(path) => Arc::new(
            JsonFileStorage::open(path)
                .await
                .with_context(|| format!("opening store {:?}", path))?,
        ),
        None => {
            info!("No store configured, records are kept in memory");
            Arc::new(MemStorage::new())
        }
    };

    let collection: Arc<Collection<Media>> = Arc::new(Collection::with_buffer(
        config.prefix.clone(),
        storage,
        config.event_buffer,
    ));

    // Watch before scanning so nothing changed during the scan is missed.
    let reconciler = Reconciler::new(&config.data_dir, Arc::clone(&collection));
    let (_watch, report) = reconciler
        .start()
        .await
        .context("initial reconciliation")?;
    info!(
        "Initial scan: {} created, {} removed, {} skipped",
        report.created, report.removed, report.skipped
    );

    let urls = UrlMapper::new(reconciler.dir(), config.public_url.clone());

    if let Some(ws_addr) = &config.ws {
        let listener = EventServer::bind(ws_addr).await?;
        let server = EventServer::new(Arc::clone(&collection), urls.clone(), config.keepalive());
        tokio::spawn(server.run(listener));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        collection,
        urls,
        keepalive: config.keepalive(),
        shutdown: shutdown_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.http)
        .await
        .with_context(|| format!("binding {}", config.http))?;
    info!("HTTP API listening on {}", config.http);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends open event streams.
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
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
