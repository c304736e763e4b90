//! Insertion-ordered transaction store with a concurrent fingerprint index.
//!
//! ## Design
//!
//! - `DashMap` keyed by fingerprint gives lock-free concurrent lookups for
//!   the hot admission path (duplicate sender recording, commit removal).
//! - A `parking_lot::RwLock<BTreeMap>` keyed by a monotonic sequence number
//!   preserves arrival order for FIFO reaps and gives O(log n) removal.
//!
//! Index and order are mutated in lockstep: inserts hit the index before the
//! order map, removals leave the order map before the index. A reader
//! walking the order map therefore sees a valid prefix at every instant;
//! entries mid-removal simply fail the index lookup and are skipped, which
//! is the same tolerance the reap path needs anyway.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::TxKey;

/// Handle to an entry's position in insertion order.
pub type Seq = u64;

/// A transaction admitted to the pool, plus pool-management metadata.
#[derive(Debug)]
pub struct PoolEntry {
    /// The pool's last committed height when this entry was admitted.
    height: u64,
    /// The extracted fee clamped to 64 bits; the sort key for fee reaps.
    fee_weight: i64,
    /// Position in insertion order. Assigned by [`OrderedPool::push_back`].
    seq: Seq,
    /// The opaque transaction bytes.
    tx: Vec<u8>,
    /// Sender ids this transaction has been observed from. Used upstream
    /// to suppress gossiping a transaction back to its source.
    senders: Mutex<HashSet<u16>>,
}

impl PoolEntry {
    /// Creates an entry for a fresh admission. The sequence number is
    /// assigned when the entry enters the pool.
    pub fn new(tx: Vec<u8>, height: u64, fee_weight: i64, sender: u16) -> Self {
        let mut senders = HashSet::new();
        senders.insert(sender);
        Self {
            height,
            fee_weight,
            seq: 0,
            tx,
            senders: Mutex::new(senders),
        }
    }

    /// The transaction bytes.
    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    /// Admission-time pool height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Fee sort weight.
    pub fn fee_weight(&self) -> i64 {
        self.fee_weight
    }

    /// Insertion-order handle.
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Records another sender for this transaction. Returns `true` if the
    /// sender was new.
    pub fn add_sender(&self, sender: u16) -> bool {
        self.senders.lock().insert(sender)
    }

    /// Whether the given sender has submitted this transaction.
    pub fn has_sender(&self, sender: u16) -> bool {
        self.senders.lock().contains(&sender)
    }

    /// Number of distinct senders observed.
    pub fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }
}

/// Concurrent insertion-ordered store of pool entries.
#[derive(Debug, Default)]
pub struct OrderedPool {
    /// fingerprint -> entry
    index: DashMap<TxKey, Arc<PoolEntry>>,
    /// sequence -> fingerprint, in insertion order
    order: RwLock<BTreeMap<Seq, TxKey>>,
    next_seq: AtomicU64,
}

impl OrderedPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, assigning its insertion-order handle.
    pub fn push_back(&self, key: TxKey, mut entry: PoolEntry) -> Seq {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        entry.seq = seq;
        self.index.insert(key, Arc::new(entry));
        self.order.write().insert(seq, key);
        seq
    }

    /// Looks up an entry by fingerprint.
    pub fn get(&self, key: &TxKey) -> Option<Arc<PoolEntry>> {
        self.index.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Removes an entry by fingerprint, returning it if it was present.
    pub fn remove(&self, key: &TxKey) -> Option<Arc<PoolEntry>> {
        // Leave the order map first so concurrent readers never observe a
        // seq whose index entry has already been handed back to the caller.
        let entry = self.get(key)?;
        self.order.write().remove(&entry.seq);
        self.index.remove(key).map(|(_, e)| e)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// First entry in insertion order.
    pub fn front(&self) -> Option<(Seq, Arc<PoolEntry>)> {
        let order = self.order.read();
        order
            .iter()
            .find_map(|(seq, key)| self.get(key).map(|e| (*seq, e)))
    }

    /// First entry strictly after the given handle.
    pub fn next(&self, after: Seq) -> Option<(Seq, Arc<PoolEntry>)> {
        let order = self.order.read();
        order
            .range(after + 1..)
            .find_map(|(seq, key)| self.get(key).map(|e| (*seq, e)))
    }

    /// Last entry in insertion order.
    pub fn back(&self) -> Option<(Seq, Arc<PoolEntry>)> {
        let order = self.order.read();
        order
            .iter()
            .rev()
            .find_map(|(seq, key)| self.get(key).map(|e| (*seq, e)))
    }

    /// Snapshot of up to `limit` entries in insertion order. `None` takes
    /// everything.
    pub fn fifo_snapshot(&self, limit: Option<usize>) -> Vec<Arc<PoolEntry>> {
        let order = self.order.read();
        let cap = limit.unwrap_or(order.len()).min(order.len());
        let mut out = Vec::with_capacity(cap);
        for key in order.values() {
            if out.len() >= cap {
                break;
            }
            if let Some(entry) = self.get(key) {
                out.push(entry);
            }
        }
        out
    }

    /// Snapshot of every entry, unordered.
    pub fn snapshot(&self) -> Vec<Arc<PoolEntry>> {
        self.index
            .iter()
            .map(|item| Arc::clone(item.value()))
            .collect()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.order.write().clear();
        self.index.clear();
    }

    /// Fingerprints currently indexed. Test support for the
    /// index-equals-order invariant.
    #[cfg(test)]
    pub(crate) fn index_keys(&self) -> HashSet<TxKey> {
        self.index.iter().map(|item| *item.key()).collect()
    }

    #[cfg(test)]
    pub(crate) fn order_keys(&self) -> HashSet<TxKey> {
        self.order.read().values().copied().collect()
    }
}
