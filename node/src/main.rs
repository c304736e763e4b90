// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Stagepool Service Binary
//!
//! Entry point for `stagepool-node`. Parses CLI arguments, initializes
//! logging and metrics, dials the orderer fleet, and serves three HTTP
//! listeners: the JSON-RPC gateway, the administrative surface, and the
//! Prometheus metrics endpoint.
//!
//! Configuration comes from `app.toml` in the directory named by
//! `MEMPOOL_CONF`; the write-ahead log lands under `MEMPOOL_DATA`.

mod api;
mod cli;
mod import;
mod logging;
mod metrics;
mod rpc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use stagepool::config::{
    distribution_handle, AppConfig, DistributionRule, MempoolConfig, SortPolicy, ENV_CONF_DIR,
    ENV_DATA_DIR,
};
use stagepool::dispatch::Dispatcher;
use stagepool::mempool::Mempool;
use stagepool::orderer::Fetcher;
use stagepool::wire::EnvelopeFeeExtractor;

use cli::{Cli, Commands};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_service(args).await,
        Commands::Import(args) => {
            logging::init("info", LogFormat::Pretty);
            import::run(args).await
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full service: mempool, orderer fleet, dispatch core, and the
/// three HTTP listeners.
async fn run_service(args: cli::StartArgs) -> Result<()> {
    logging::init(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let conf_dir = env_dir(ENV_CONF_DIR, "conf");
    let data_dir = env_dir(ENV_DATA_DIR, "data");
    tracing::info!(
        rpc_port = args.rpc_port,
        rest_addr = %args.rest_addr,
        metrics_port = args.metrics_port,
        conf_dir = %conf_dir.display(),
        data_dir = %data_dir.display(),
        forward = args.forward,
        "starting stagepool-node"
    );

    // --- Static configuration ---
    let app_config = AppConfig::load(&conf_dir)
        .with_context(|| format!("loading configuration from {}", conf_dir.display()))?;

    // --- Runtime policy switches ---
    let Some(rule) = DistributionRule::from_code(args.dist_type) else {
        bail!("invalid distribution type {} (expected 0 or 1)", args.dist_type);
    };
    let distribution = distribution_handle(rule);
    let sort = SortPolicy::new(args.sort_switch);

    // --- Mempool ---
    let mempool_config = MempoolConfig {
        wal_dir: Some(data_dir.join("mempool")),
        ..MempoolConfig::default()
    };
    let mut mempool = Mempool::new(mempool_config, 0, Arc::new(EnvelopeFeeExtractor))
        .context("opening the mempool write-ahead log")?;
    let mut txs_available = mempool.enable_txs_available();
    let mempool = Arc::new(mempool);

    // Nothing consumes the availability signal yet; keep the receiving end
    // alive and visible in the logs for future block-driver integration.
    tokio::spawn(async move {
        while txs_available.recv().await.is_some() {
            tracing::debug!("mempool became non-empty");
        }
    });

    // --- Orderer fleet ---
    let fetcher = Fetcher::from_config(&app_config, Arc::clone(&distribution))
        .await
        .context("connecting the orderer fleet")?;
    tracing::info!(orderers = fetcher.len(), rule = %rule, "orderer fleet connected");

    // --- Dispatch core ---
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&mempool),
        fetcher,
        distribution,
        sort,
        Arc::new(EnvelopeFeeExtractor),
        args.forward,
    ));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let state = api::AppState {
        dispatcher,
        metrics: Arc::clone(&node_metrics),
    };

    // --- Listeners ---
    let rpc_addr = format!("0.0.0.0:{}", args.rpc_port);
    let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {rpc_addr}"))?;
    tracing::info!("RPC gateway listening on {rpc_addr}");

    let rest_addr = cli::resolve_bind_addr(&args.rest_addr).map_err(anyhow::Error::msg)?;
    let rest_listener = tokio::net::TcpListener::bind(rest_addr)
        .await
        .with_context(|| format!("failed to bind admin listener on {rest_addr}"))?;
    tracing::info!("admin surface listening on {rest_addr}");

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(node_metrics);
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("metrics listening on {metrics_addr}");

    // --- Serve ---
    tokio::select! {
        res = axum::serve(rpc_listener, rpc::rpc_router(state.clone())) => {
            if let Err(e) = res {
                tracing::error!("RPC server error: {e}");
            }
        }
        res = axum::serve(rest_listener, api::admin_router(state.clone())) => {
            if let Err(e) = res {
                tracing::error!("admin server error: {e}");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    mempool.close_wal();
    tracing::info!("stagepool-node stopped");
    Ok(())
}

/// Resolves a directory from the environment, with a relative fallback for
/// local runs.
fn env_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Prints version information to stdout.
fn print_version() {
    println!("stagepool-node {}", env!("CARGO_PKG_VERSION"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
