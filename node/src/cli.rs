//! Command-line interface for `stagepool-node`, built with `clap` derive.
//!
//! Three subcommands: `start` runs the service, `import` bulk-loads
//! transactions from a CSV export through the admin surface, `version`
//! prints build information. Every `start` flag has an environment-variable
//! twin so container deployments don't need a wall of arguments.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Transaction-staging service for a permissioned ledger.
///
/// Accepts endorsed transactions from clients, stages them in a bounded,
/// deduplicated pool, and hands tailored batches to ordering nodes on pull.
#[derive(Parser, Debug)]
#[command(name = "stagepool-node", about = "Stagepool transaction-staging service", version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the staging service.
    Start(StartArgs),
    /// Bulk-load transfer records from a CSV file via the admin surface.
    Import(ImportArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `start` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StartArgs {
    /// Port for the RPC gateway (transaction submission and pulls).
    #[arg(long = "rpc-port", short = 'p', env = "MEMPOOL_RPC_PORT", default_value_t = 8080)]
    pub rpc_port: u16,

    /// Bind address for the administrative HTTP surface. A bare `:port`
    /// binds every interface.
    #[arg(long = "rest-addr", short = 'r', env = "MEMPOOL_REST_ADDR", default_value = ":8081")]
    pub rest_addr: String,

    /// Initial fee distribution rule: 0 credits the pulling orderer,
    /// 1 splits evenly across the fleet.
    #[arg(long = "dist-type", short = 'd', default_value_t = 0)]
    pub dist_type: u8,

    /// Start with fee-descending reap order instead of arrival order.
    #[arg(long = "sort", short = 's', action = clap::ArgAction::Set, default_value_t = false)]
    pub sort_switch: bool,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MEMPOOL_METRICS_PORT", default_value_t = 8082)]
    pub metrics_port: u16,

    /// Forward reaped batches down the orderer streams. Without this flag
    /// the service only accounts fees and removes batches from the pool.
    #[arg(long)]
    pub forward: bool,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, env = "MEMPOOL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, env = "MEMPOOL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `import` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ImportArgs {
    /// CSV file of transfer records (`from,to,value,fee` header).
    #[arg(long = "file", short = 'f')]
    pub file: PathBuf,

    /// Records to launch before awaiting their completions.
    #[arg(long = "batch", short = 'b', default_value_t = 100)]
    pub batch: usize,

    /// Pause between records, in nanoseconds. Zero floods.
    #[arg(long = "interval", short = 'i', default_value_t = 0)]
    pub interval_ns: u64,

    /// Admin surface of the running service to import into.
    #[arg(long, default_value = "http://127.0.0.1:8081")]
    pub endpoint: String,
}

/// Resolves a `host:port` or bare `:port` string into a bind address.
pub fn resolve_bind_addr(addr: &str) -> Result<SocketAddr, String> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| format!("invalid bind address {addr:?}: {e}"))
}
