//! Error types, one enum per concern.
//!
//! Admission errors go back to the submitting client verbatim; the service
//! never retries on the client's behalf. Transport errors inside the
//! forwarding fan-out are logged and retried once after a reconnect, then
//! dropped. Configuration errors are fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by mempool admission and commit operations.
#[derive(Debug, Error)]
pub enum MempoolError {
    /// The transaction exceeds the single-transaction size bound.
    #[error("transaction too large: {got} bytes, limit {max}")]
    TxTooLarge {
        /// Configured per-transaction byte limit.
        max: usize,
        /// Size of the rejected transaction.
        got: usize,
    },

    /// Admitting the transaction would exceed the pool's count or byte bound.
    #[error("mempool is full: {size}/{max_size} txs, {bytes}/{max_bytes} bytes")]
    Full {
        /// Current transaction count.
        size: usize,
        /// Configured count bound.
        max_size: usize,
        /// Current total bytes.
        bytes: i64,
        /// Configured byte bound.
        max_bytes: i64,
    },

    /// A configured pre-check filter rejected the transaction.
    #[error("pre-check failed: {0}")]
    PreCheckFailed(String),

    /// The fingerprint is already known to the duplicate cache.
    #[error("transaction already in cache")]
    TxInCache,

    /// The write-ahead append failed. The fingerprint was not cached, so
    /// resubmitting the same transaction is legal.
    #[error("write-ahead log append failed")]
    WalWrite(#[source] std::io::Error),
}

/// Errors returned by the dispatch core to RPC callers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pull named an orderer with no connected client.
    #[error("unknown orderer: {0}")]
    UnknownOrderer(String),

    /// An admission error surfaced through the dispatch path.
    #[error(transparent)]
    Mempool(#[from] MempoolError),
}

/// Errors on the orderer stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transaction bytes did not decode as a ledger envelope.
    #[error("envelope decode failed: {0}")]
    Decode(#[from] crate::wire::WireError),

    /// Writing the envelope frame to the stream failed.
    #[error("stream send failed: {0}")]
    SendFailed(String),

    /// Reading the acknowledgement frame failed.
    #[error("stream recv failed: {0}")]
    RecvFailed(String),

    /// The orderer acknowledged with a non-success status.
    #[error("unexpected broadcast status: {0}")]
    AckStatus(u32),

    /// No live stream; the client must be (re)connected first.
    #[error("orderer stream not connected")]
    NotConnected,

    /// Redialing the orderer failed.
    #[error("reconnect to {addr} failed: {reason}")]
    ReconnectFailed {
        /// Address that was dialed.
        addr: String,
        /// Underlying dial failure.
        reason: String,
    },
}

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or parsed.
    #[error("config load failed: {0}")]
    Load(String),

    /// TLS is enabled but an orderer's CA certificate is absent.
    #[error("TLS material missing for orderer {orderer}: {path}")]
    TlsMaterialMissing {
        /// Orderer whose material is missing.
        orderer: String,
        /// Path that was checked.
        path: PathBuf,
    },

    /// An orderer could not be dialed at startup.
    #[error("connect to orderer {orderer} at {addr} failed: {reason}")]
    OrdererUnreachable {
        /// Orderer that failed to connect.
        orderer: String,
        /// Address that was dialed.
        addr: String,
        /// Underlying dial failure.
        reason: String,
    },
}
