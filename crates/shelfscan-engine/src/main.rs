//! Inventory tracking binary.
//!
//! Reads JSON-lines detection frames from `DETECTION_FEED_PATH` (or stdin),
//! reconciles them against the configured backend and prints the final
//! inventory summary as JSON on stdout.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shelfscan_engine::metrics::init_metrics;
use shelfscan_engine::{
    BackendKind, DetectionFeed, EngineConfig, InMemoryInventory, Pipeline, SheetsInventory,
};
use shelfscan_sheets::SheetsClient;

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production. Logs go to stderr;
    // stdout carries the summary.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("shelfscan=info".parse().unwrap())
        .add_directive("shelfscan_engine=info".parse().unwrap())
        .add_directive("shelfscan_sheets=info".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting shelfscan");

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    info!("Engine config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        match init_metrics(addr) {
            Ok(()) => info!(%addr, "Prometheus metrics listening"),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let mut pipeline = match config.backend.kind {
        BackendKind::None => Pipeline::local_only(config.tracking.clone(), "INVENTORY_BACKEND=none"),
        BackendKind::Memory => Pipeline::with_backend(
            config.tracking.clone(),
            Arc::new(InMemoryInventory::new()),
            &config.backend,
            shutdown_rx.clone(),
        ),
        BackendKind::Sheets => {
            let connected = match SheetsClient::from_env().await {
                Ok(client) => {
                    SheetsInventory::connect_with_retry(client, &config.backend, shutdown_rx.clone())
                        .await
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            match connected {
                Ok(sheets) => Pipeline::with_backend(
                    config.tracking.clone(),
                    Arc::new(sheets),
                    &config.backend,
                    shutdown_rx.clone(),
                ),
                Err(reason) => {
                    warn!("Sheets backend unavailable, tracking locally: {}", reason);
                    Pipeline::local_only(config.tracking.clone(), reason)
                }
            }
        }
    };

    let mut feed = match DetectionFeed::open(config.feed_path.as_deref()).await {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open detection feed: {}", e);
            std::process::exit(1);
        }
    };

    let result = pipeline.run(&mut feed, shutdown_rx).await;
    if let Err(e) = &result {
        error!("Detection feed failed: {}", e);
    }

    let summary = pipeline.finish().await;
    match summary.to_json_pretty() {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize summary: {}", e),
    }

    info!(
        frames = summary.frames,
        tracked = summary.tracked,
        registered = summary.registered,
        "Shutdown complete"
    );

    if result.is_err() {
        std::process::exit(1);
    }
}
