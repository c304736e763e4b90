//! Service configuration and runtime policy switches.
//!
//! Static configuration (orderer endpoints, pool bounds, timeouts) is loaded
//! once at startup from `app.toml` under the directory named by the
//! `MEMPOOL_CONF` environment variable. Values can be overridden through
//! `MEMPOOL_APP_`-prefixed environment variables for container deployments.
//!
//! Two knobs are *not* static: the fee distribution rule and the reap sort
//! policy are flipped at runtime through the administrative surface and read
//! on every pull. They live here as shared handles so the dispatch core and
//! the HTTP layer agree on a single source of truth.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the configuration directory.
pub const ENV_CONF_DIR: &str = "MEMPOOL_CONF";

/// Environment variable naming the data root for the write-ahead log.
pub const ENV_DATA_DIR: &str = "MEMPOOL_DATA";

/// Configuration file name inside the configuration directory.
pub const CONF_FILE: &str = "app.toml";

/// Dial and stream-open timeout for orderer connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single framed message on the orderer stream. Batches are
/// fetched by count, not by frame, so a single envelope never comes close.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Default number of transactions an orderer pulls per fetch.
pub const DEFAULT_BATCH_CAPACITY: u32 = 10;

// ---------------------------------------------------------------------------
// Mempool tunables
// ---------------------------------------------------------------------------

/// Bounds and feature switches for the transaction pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Maximum number of transactions held in the pool.
    pub max_size: usize,
    /// Maximum total transaction bytes held in the pool.
    pub max_bytes: i64,
    /// Maximum size of a single transaction, in bytes.
    pub max_tx_bytes: usize,
    /// Capacity of the duplicate-fingerprint cache. `0` disables caching
    /// entirely (every submission is treated as unseen).
    pub cache_size: usize,
    /// Whether remaining entries are marked for recheck after a commit.
    pub recheck: bool,
    /// Directory for the write-ahead log. `None` disables the log.
    pub wal_dir: Option<PathBuf>,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_bytes: 1024 * 1024 * 1024,
            max_tx_bytes: 1024 * 1024,
            cache_size: 10_000,
            recheck: false,
            wal_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Application configuration (file-backed)
// ---------------------------------------------------------------------------

/// A single configured orderer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdererEndpoint {
    /// Stable name used by pull requests and the admin surface.
    pub name: String,
    /// Host to dial (ignored when `local` is set on the application).
    pub host: String,
    /// TCP port of the orderer's broadcast listener.
    pub port: u16,
    /// CA certificate for this orderer. Required when TLS is enabled.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

impl OrdererEndpoint {
    /// Resolves the dial address, honouring the local-development switch.
    pub fn dial_addr(&self, local: bool) -> String {
        if local {
            format!("127.0.0.1:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Top-level application configuration, the `[application]` table of
/// `app.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dial all orderers on localhost regardless of configured hosts.
    #[serde(default)]
    pub local: bool,
    /// Whether orderer connections require TLS material to be present.
    #[serde(default)]
    pub tls_enabled: bool,
    /// Per-request deadline, in seconds, for the RPC surface.
    #[serde(default = "default_req_timeout")]
    pub req_timeout_secs: u64,
    /// Default batch size assigned to every orderer at startup.
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,
    /// The orderer fleet. Must be non-empty.
    pub orderers: Vec<OrdererEndpoint>,
}

fn default_req_timeout() -> u64 {
    30
}

fn default_capacity() -> u32 {
    DEFAULT_BATCH_CAPACITY
}

impl AppConfig {
    /// Loads configuration from `<dir>/app.toml`, with `MEMPOOL_APP_`
    /// environment variables taking precedence over file values.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONF_FILE);
        let figment = Figment::from(Toml::file(&path)).merge(Env::prefixed("MEMPOOL_APP_").split("__"));

        let config: AppConfig = figment
            .extract_inner("application")
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that must hold before any orderer is dialed:
    /// at least one orderer is configured, and when TLS is enabled every
    /// orderer names a CA certificate that exists on disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orderers.is_empty() {
            return Err(ConfigError::Load("no orderers configured".into()));
        }
        if self.tls_enabled {
            for orderer in &self.orderers {
                match &orderer.ca_cert {
                    Some(path) if path.is_file() => {}
                    Some(path) => {
                        return Err(ConfigError::TlsMaterialMissing {
                            orderer: orderer.name.clone(),
                            path: path.clone(),
                        });
                    }
                    None => {
                        return Err(ConfigError::TlsMaterialMissing {
                            orderer: orderer.name.clone(),
                            path: PathBuf::new(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runtime policy switches
// ---------------------------------------------------------------------------

/// How a consumed transaction's fee is credited to orderer accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionRule {
    /// The whole fee goes to the orderer that serviced the pull.
    AllToOne,
    /// The fee is split evenly across all orderers; the integer remainder
    /// stays with the orderer that serviced the pull.
    EqualSplit,
}

impl DistributionRule {
    /// Maps the admin-surface integer encoding (`0` or `1`).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::AllToOne),
            1 => Some(Self::EqualSplit),
            _ => None,
        }
    }

    /// The admin-surface integer encoding.
    pub fn code(&self) -> u8 {
        match self {
            Self::AllToOne => 0,
            Self::EqualSplit => 1,
        }
    }
}

impl fmt::Display for DistributionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllToOne => write!(f, "all to one"),
            Self::EqualSplit => write!(f, "average"),
        }
    }
}

/// Shared handle to the live distribution rule. Read on every pull, written
/// by `POST /allocation`.
pub type DistributionHandle = Arc<parking_lot::RwLock<DistributionRule>>;

/// Creates a distribution handle with the given initial rule.
pub fn distribution_handle(rule: DistributionRule) -> DistributionHandle {
    Arc::new(parking_lot::RwLock::new(rule))
}

/// Runtime reap-ordering policy. `false` reaps in arrival order, `true`
/// reaps highest-fee-first.
#[derive(Debug, Default)]
pub struct SortPolicy {
    fee_priority: AtomicBool,
}

impl SortPolicy {
    /// Creates the policy with an initial switch position.
    pub fn new(fee_priority: bool) -> Self {
        Self {
            fee_priority: AtomicBool::new(fee_priority),
        }
    }

    /// Current switch position.
    pub fn fee_priority(&self) -> bool {
        self.fee_priority.load(Ordering::Relaxed)
    }

    /// Flips the switch. Takes effect on the next pull.
    pub fn set_fee_priority(&self, on: bool) {
        self.fee_priority.store(on, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_rule_codes_roundtrip() {
        assert_eq!(DistributionRule::from_code(0), Some(DistributionRule::AllToOne));
        assert_eq!(DistributionRule::from_code(1), Some(DistributionRule::EqualSplit));
        assert_eq!(DistributionRule::from_code(2), None);
        assert_eq!(DistributionRule::AllToOne.code(), 0);
        assert_eq!(DistributionRule::EqualSplit.code(), 1);
    }

    #[test]
    fn distribution_rule_display_matches_admin_vocabulary() {
        assert_eq!(DistributionRule::AllToOne.to_string(), "all to one");
        assert_eq!(DistributionRule::EqualSplit.to_string(), "average");
    }

    #[test]
    fn sort_policy_flips() {
        let policy = SortPolicy::new(false);
        assert!(!policy.fee_priority());
        policy.set_fee_priority(true);
        assert!(policy.fee_priority());
    }

    #[test]
    fn mempool_config_defaults() {
        let config = MempoolConfig::default();
        assert_eq!(config.max_size, 10_000);
        assert_eq!(config.max_tx_bytes, 1024 * 1024);
        assert_eq!(config.cache_size, 10_000);
        assert!(!config.recheck);
        assert!(config.wal_dir.is_none());
    }

    #[test]
    fn dial_addr_honours_local_switch() {
        let ep = OrdererEndpoint {
            name: "orderer0".into(),
            host: "orderer0.example.com".into(),
            port: 7050,
            ca_cert: None,
        };
        assert_eq!(ep.dial_addr(false), "orderer0.example.com:7050");
        assert_eq!(ep.dial_addr(true), "127.0.0.1:7050");
    }

    #[test]
    fn app_config_rejects_empty_fleet() {
        let config = AppConfig {
            local: true,
            tls_enabled: false,
            req_timeout_secs: 30,
            default_capacity: 10,
            orderers: vec![],
        };
        assert!(matches!(config.validate(), Err(ConfigError::Load(_))));
    }

    #[test]
    fn app_config_requires_tls_material_when_enabled() {
        let config = AppConfig {
            local: true,
            tls_enabled: true,
            req_timeout_secs: 30,
            default_capacity: 10,
            orderers: vec![OrdererEndpoint {
                name: "orderer0".into(),
                host: "localhost".into(),
                port: 7050,
                ca_cert: Some(PathBuf::from("/nonexistent/tls/ca.crt")),
            }],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TlsMaterialMissing { .. })
        ));
    }

    #[test]
    fn app_config_parses_from_toml() {
        let figment = Figment::from(Toml::string(
            r#"
            [application]
            local = true
            tls_enabled = false
            default_capacity = 7

            [[application.orderers]]
            name = "orderer0"
            host = "orderer0.example.com"
            port = 7050

            [[application.orderers]]
            name = "orderer1"
            host = "orderer1.example.com"
            port = 7060
            "#,
        ));
        let config: AppConfig = figment.extract_inner("application").unwrap();
        assert!(config.local);
        assert_eq!(config.default_capacity, 7);
        assert_eq!(config.orderers.len(), 2);
        assert_eq!(config.req_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }
}
