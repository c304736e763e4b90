//! The concurrent transaction pool.
//!
//! Submissions enter through [`Mempool::check_tx`], which deduplicates via
//! the fingerprint cache, appends to the write-ahead log, prices the
//! transaction, and indexes it in the insertion-ordered store. Batches leave
//! through the non-destructive reap operations; removal happens only in
//! [`Mempool::update`], which runs under the exclusive side of the update
//! lock while admissions and reaps share the read side.

mod cache;
mod list;
mod pool;
mod wal;

pub use cache::{LruTxCache, NopTxCache, TxCache};
pub use list::{OrderedPool, PoolEntry, Seq};
pub use pool::{CheckFn, FeeExtractor, Mempool, UpdateGuard};
pub use wal::WriteAheadLog;

/// Size of a transaction fingerprint: SHA-256 output.
pub const TX_KEY_SIZE: usize = 32;

/// A transaction fingerprint, the primary identity of a transaction.
pub type TxKey = [u8; TX_KEY_SIZE];

/// Computes the fingerprint of a transaction blob.
pub fn tx_key(tx: &[u8]) -> TxKey {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(tx);
    let mut key = [0u8; TX_KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}

/// Hex transaction id synthesized from the fingerprint, used when the
/// envelope does not carry one.
pub fn tx_id(tx: &[u8]) -> String {
    hex::encode(tx_key(tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = tx_key(b"transaction-a");
        let b = tx_key(b"transaction-b");
        assert_eq!(a, tx_key(b"transaction-a"));
        assert_ne!(a, b);
    }

    #[test]
    fn tx_id_is_hex_of_fingerprint() {
        let id = tx_id(b"payload");
        assert_eq!(id.len(), TX_KEY_SIZE * 2);
        assert_eq!(id, hex::encode(tx_key(b"payload")));
    }
}
