// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use kingress::config::Cli;
use kingress::constants::{CONTROLLER_NAME, METRICS_SERVER_PATH};
use kingress::context::ClusterSnapshotProvider;
use kingress::gateway::GatewayAdmin;
use kingress::metrics::gather_metrics;
use kingress::reconcilers::{Engine, KubeStatusReporter};
use kingress::snapshot::SnapshotProvider;
use kube::Client;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name(CONTROLLER_NAME)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

/// Initialize logging.
///
/// Respects RUST_LOG (default `info`) and RUST_LOG_FORMAT (`json` or `text`).
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    init_tracing();

    info!(
        admin_url = %cli.admin_url,
        ingress_class = %cli.ingress_class,
        namespace = cli.watch_namespace.as_deref().unwrap_or("<all>"),
        "Starting kingress controller"
    );

    let metrics_addr: SocketAddr = cli
        .metrics_bind_address
        .parse()
        .with_context(|| format!("invalid metrics bind address {}", cli.metrics_bind_address))?;

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let provider = ClusterSnapshotProvider::start(
        &client,
        cli.watch_namespace.as_deref(),
        cli.snapshot_ready_timeout(),
    );
    let admin = GatewayAdmin::new(&cli.admin_url, cli.admin_token.clone(), cli.admin_timeout())?;
    let reporter = KubeStatusReporter::new(client);
    let events = provider.subscribe();
    let engine = Engine::new(provider, admin, reporter, cli.engine_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve_metrics(metrics_addr, shutdown_rx.clone()));
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    engine.run(events, shutdown_rx).await;

    info!("kingress controller stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Cannot install SIGTERM handler, only handling SIGINT");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn metrics_routes() -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Serve Prometheus metrics until shutdown.
async fn serve_metrics(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => {
            info!(addr = %addr, path = METRICS_SERVER_PATH, "Metrics server started");
            l
        }
        Err(e) => {
            error!(error = %e, addr = %addr, "Failed to bind metrics server");
            return;
        }
    };
    let graceful = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };
    if let Err(e) = axum::serve(listener, metrics_routes())
        .with_graceful_shutdown(graceful)
        .await
    {
        error!(error = %e, "Metrics server error");
    }
}
