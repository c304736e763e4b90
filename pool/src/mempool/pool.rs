//! The mempool facade: admission, reap, and commit.
//!
//! ## Locking discipline
//!
//! A single read/write lock serializes commits against everything else:
//! [`Mempool::check_tx`], the reap operations, and [`Mempool::flush`] share
//! the read side; [`Mempool::update`] requires the write side, which the
//! caller acquires through [`Mempool::lock_updates`]. The dispatch core
//! holds one guard across its whole pull (reap, fee distribution, commit),
//! so a batch can never be reaped twice. Callers that drive the pool
//! without the dispatch core must do the same around reap+update pairs.
//!
//! The fingerprint index, order map, duplicate cache, and counters are
//! individually thread-safe and need no extra locking.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use num::{BigUint, ToPrimitive, Zero};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::config::MempoolConfig;
use crate::error::MempoolError;
use crate::wire::WireError;

use super::cache::{LruTxCache, NopTxCache, TxCache};
use super::list::{OrderedPool, PoolEntry, Seq};
use super::wal::WriteAheadLog;
use super::{tx_id, tx_key};

/// Prices an opaque transaction blob.
///
/// Injected so the pool never links against envelope decoding directly and
/// tests can substitute arbitrary pricing.
pub trait FeeExtractor: Send + Sync {
    /// Returns the fee and the ledger transaction id carried by the blob.
    fn fee_and_id(&self, tx: &[u8]) -> Result<(BigUint, String), WireError>;
}

/// Filter applied to a transaction before admission (and, when installed by
/// a commit, to survivors during recheck).
pub type CheckFn = Box<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

/// Proof that the exclusive side of the update lock is held. Obtained from
/// [`Mempool::lock_updates`]; required by [`Mempool::update`] and the
/// `_locked` reap variants.
pub struct UpdateGuard<'a> {
    _inner: RwLockWriteGuard<'a, ()>,
}

/// The concurrent transaction pool.
pub struct Mempool {
    config: MempoolConfig,
    /// Last committed height.
    height: AtomicU64,
    /// Total bytes of pooled transactions.
    txs_bytes: AtomicI64,
    /// Commit-exclusion lock. See the module docs.
    update_mtx: RwLock<()>,
    list: OrderedPool,
    cache: Box<dyn TxCache>,
    wal: Option<WriteAheadLog>,
    fee_extractor: Arc<dyn FeeExtractor>,
    pre_check: Mutex<Option<CheckFn>>,
    post_check: Mutex<Option<CheckFn>>,
    /// Edge flag for the availability signal; reset by every commit.
    notified_txs_available: AtomicBool,
    txs_available: Option<mpsc::Sender<()>>,
    /// Span of entries awaiting recheck after a partial commit. Consumed by
    /// an external recheck driver; admission and reap ignore it.
    recheck_span: Mutex<Option<(Seq, Seq)>>,
}

impl Mempool {
    /// Creates a pool at the given committed height. Opens the write-ahead
    /// log when the configuration names a directory for it.
    pub fn new(
        config: MempoolConfig,
        height: u64,
        fee_extractor: Arc<dyn FeeExtractor>,
    ) -> std::io::Result<Self> {
        let cache: Box<dyn TxCache> = if config.cache_size > 0 {
            Box::new(LruTxCache::new(config.cache_size))
        } else {
            Box::new(NopTxCache)
        };
        let wal = match &config.wal_dir {
            Some(dir) => Some(WriteAheadLog::open(dir)?),
            None => None,
        };
        Ok(Self {
            config,
            height: AtomicU64::new(height),
            txs_bytes: AtomicI64::new(0),
            update_mtx: RwLock::new(()),
            list: OrderedPool::new(),
            cache,
            wal,
            fee_extractor,
            pre_check: Mutex::new(None),
            post_check: Mutex::new(None),
            notified_txs_available: AtomicBool::new(false),
            txs_available: None,
            recheck_span: Mutex::new(None),
        })
    }

    /// Turns on the availability signal and returns its receiving end.
    /// Call once at startup, before the pool is shared.
    pub fn enable_txs_available(&mut self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.txs_available = Some(tx);
        rx
    }

    /// Number of pooled transactions.
    pub fn size(&self) -> usize {
        self.list.len()
    }

    /// Whether the pool holds no transactions.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Total bytes of pooled transactions.
    pub fn txs_bytes(&self) -> i64 {
        self.txs_bytes.load(Ordering::Acquire)
    }

    /// Last committed height.
    pub fn height(&self) -> u64 {
        self.height.load(Ordering::Acquire)
    }

    /// Entry lookup by fingerprint.
    pub fn entry(&self, key: &super::TxKey) -> Option<Arc<PoolEntry>> {
        self.list.get(key)
    }

    /// Acquires the exclusive side of the update lock. Hold the guard across
    /// a reap/commit pair to make a pull exactly-once.
    pub fn lock_updates(&self) -> UpdateGuard<'_> {
        UpdateGuard {
            _inner: self.update_mtx.write(),
        }
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admits a transaction.
    ///
    /// Side effects on a fresh admission happen in a fixed order: write-ahead
    /// append, cache push, fee extraction, entry construction, list append.
    /// The append precedes the cache push so a log failure cannot strand a
    /// cached fingerprint that would silently reject the retry.
    pub fn check_tx(&self, tx: &[u8], sender_id: u16) -> Result<(), MempoolError> {
        let _read = self.update_mtx.read();

        let tx_size = tx.len();
        self.ensure_capacity(tx_size)?;

        if tx_size > self.config.max_tx_bytes {
            return Err(MempoolError::TxTooLarge {
                max: self.config.max_tx_bytes,
                got: tx_size,
            });
        }

        if let Some(pre_check) = self.pre_check.lock().as_ref() {
            pre_check(tx).map_err(MempoolError::PreCheckFailed)?;
        }

        if let Some(wal) = &self.wal {
            wal.write(tx).map_err(MempoolError::WalWrite)?;
        }

        let key = tx_key(tx);
        if !self.cache.push(tx) {
            // Already seen. The transaction may have left the pool (commits
            // remove entries but not cache lines); only record the new
            // sender when it is still live.
            if let Some(entry) = self.list.get(&key) {
                if entry.add_sender(sender_id) {
                    trace!(sender_id, "recorded extra sender for pooled transaction");
                }
            }
            return Err(MempoolError::TxInCache);
        }

        // The fingerprint may be pooled even though the cache forgot it
        // (LRU eviction under churn). Admitting again would double the
        // entry, so treat it as the duplicate it is.
        if let Some(entry) = self.list.get(&key) {
            entry.add_sender(sender_id);
            return Err(MempoolError::TxInCache);
        }

        // Concurrent admissions race the first bound check; verify again now
        // that this transaction is committed to the log. On failure the
        // cache line is dropped so the pool can take the tx once it drains.
        if let Err(err) = self.ensure_capacity(tx_size) {
            self.cache.remove(tx);
            return Err(err);
        }

        let (fee, ledger_tx_id) = match self.fee_extractor.fee_and_id(tx) {
            Ok(extracted) => extracted,
            Err(err) => {
                debug!(error = %err, "fee extraction failed, pricing at zero");
                (BigUint::zero(), tx_id(tx))
            }
        };
        let fee_weight = fee.to_i64().unwrap_or(i64::MAX);

        let entry = PoolEntry::new(tx.to_vec(), self.height(), fee_weight, sender_id);
        self.list.push_back(key, entry);
        self.txs_bytes.fetch_add(tx_size as i64, Ordering::AcqRel);

        info!(
            tx_id = %ledger_tx_id,
            fee = %fee,
            pool_size = self.size(),
            "admitted transaction"
        );
        self.notify_txs_available();
        Ok(())
    }

    fn ensure_capacity(&self, tx_size: usize) -> Result<(), MempoolError> {
        let size = self.size();
        let bytes = self.txs_bytes();
        if size >= self.config.max_size || tx_size as i64 + bytes > self.config.max_bytes {
            return Err(MempoolError::Full {
                size,
                max_size: self.config.max_size,
                bytes,
                max_bytes: self.config.max_bytes,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reaps (non-destructive)
    // -----------------------------------------------------------------------

    /// Up to `max` transactions in insertion order. Negative `max` means
    /// unlimited.
    pub fn reap_max_txs(&self, max: i64) -> Vec<Vec<u8>> {
        let _read = self.update_mtx.read();
        self.reap_fifo_inner(max)
    }

    /// [`Mempool::reap_max_txs`] under a caller-held update guard.
    pub fn reap_max_txs_locked(&self, _lock: &UpdateGuard<'_>, max: i64) -> Vec<Vec<u8>> {
        self.reap_fifo_inner(max)
    }

    /// Up to `max` transactions ordered by fee weight descending, ties
    /// broken by insertion order. Computed from a snapshot of the index.
    pub fn reap_max_txs_by_sort(&self, max: i64) -> Vec<Vec<u8>> {
        let _read = self.update_mtx.read();
        self.reap_sorted_inner(max)
    }

    /// [`Mempool::reap_max_txs_by_sort`] under a caller-held update guard.
    pub fn reap_max_txs_by_sort_locked(&self, _lock: &UpdateGuard<'_>, max: i64) -> Vec<Vec<u8>> {
        self.reap_sorted_inner(max)
    }

    /// The longest insertion-order prefix whose total size stays within
    /// `max_bytes` and whose total fee weight stays within `max_gas`.
    /// A negative limit disables that check.
    pub fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Vec<u8>> {
        let _read = self.update_mtx.read();

        let mut total_bytes: i64 = 0;
        let mut total_gas: i64 = 0;
        let mut txs = Vec::new();
        for entry in self.list.fifo_snapshot(None) {
            let new_total_bytes = total_bytes + entry.tx().len() as i64;
            if max_bytes > -1 && new_total_bytes > max_bytes {
                break;
            }
            let new_total_gas = total_gas.saturating_add(entry.fee_weight());
            if max_gas > -1 && new_total_gas > max_gas {
                break;
            }
            total_bytes = new_total_bytes;
            total_gas = new_total_gas;
            txs.push(entry.tx().to_vec());
        }
        txs
    }

    fn reap_fifo_inner(&self, max: i64) -> Vec<Vec<u8>> {
        let limit = usize::try_from(max).ok();
        self.list
            .fifo_snapshot(limit)
            .iter()
            .map(|entry| entry.tx().to_vec())
            .collect()
    }

    fn reap_sorted_inner(&self, max: i64) -> Vec<Vec<u8>> {
        let mut entries = self.list.snapshot();
        entries.sort_by(|a, b| {
            b.fee_weight()
                .cmp(&a.fee_weight())
                .then_with(|| a.seq().cmp(&b.seq()))
        });
        let limit = usize::try_from(max).unwrap_or(entries.len());
        entries
            .iter()
            .take(limit.min(entries.len()))
            .map(|entry| entry.tx().to_vec())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Commits a batch: advances the height, re-arms the availability edge,
    /// optionally installs new check filters, and removes every committed
    /// transaction still in the pool. Committed fingerprints stay cached so
    /// replays are rejected.
    ///
    /// Requires the exclusive guard from [`Mempool::lock_updates`].
    pub fn update(
        &self,
        _lock: &UpdateGuard<'_>,
        height: u64,
        txs: &[Vec<u8>],
        pre_check: Option<CheckFn>,
        post_check: Option<CheckFn>,
    ) -> Result<(), MempoolError> {
        self.height.store(height, Ordering::Release);
        self.notified_txs_available.store(false, Ordering::Release);

        if let Some(filter) = pre_check {
            *self.pre_check.lock() = Some(filter);
        }
        if let Some(filter) = post_check {
            *self.post_check.lock() = Some(filter);
        }

        for tx in txs {
            self.remove_tx_by_key(tx_key(tx), false);
        }

        if self.size() > 0 {
            if self.config.recheck {
                self.mark_recheck();
            } else {
                self.notify_txs_available();
            }
        }
        Ok(())
    }

    /// Removes a transaction by fingerprint, optionally forgetting its cache
    /// line so it can be admitted again.
    pub fn remove_tx_by_key(&self, key: super::TxKey, remove_from_cache: bool) {
        if let Some(entry) = self.list.remove(&key) {
            self.txs_bytes
                .fetch_sub(entry.tx().len() as i64, Ordering::AcqRel);
            if remove_from_cache {
                self.cache.remove(entry.tx());
            }
        }
    }

    /// Drops every transaction and cache line. Counters reset to zero.
    /// Leaves the committed height untouched.
    pub fn flush(&self) {
        let _read = self.update_mtx.read();
        self.txs_bytes.store(0, Ordering::Release);
        self.cache.reset();
        self.list.clear();
    }

    // -----------------------------------------------------------------------
    // Availability signal / recheck
    // -----------------------------------------------------------------------

    fn notify_txs_available(&self) {
        if self.is_empty() {
            return;
        }
        if let Some(sender) = &self.txs_available {
            if !self.notified_txs_available.swap(true, Ordering::AcqRel) {
                // Single-slot channel; drop the signal if one is pending.
                let _ = sender.try_send(());
            }
        }
    }

    fn mark_recheck(&self) {
        let span = match (self.list.front(), self.list.back()) {
            (Some((front, _)), Some((back, _))) => Some((front, back)),
            _ => None,
        };
        if let Some((front, back)) = span {
            info!(remaining = self.size(), "marked surviving txs for recheck");
            *self.recheck_span.lock() = Some((front, back));
        }
    }

    /// Hands the pending recheck span to the recheck driver, clearing it.
    pub fn take_recheck_span(&self) -> Option<(Seq, Seq)> {
        self.recheck_span.lock().take()
    }

    /// Whether a post-check filter is installed. The filter itself is run
    /// by the recheck driver, not by admission.
    pub fn post_check_installed(&self) -> bool {
        self.post_check.lock().is_some()
    }

    /// Flushes the write-ahead log down to disk. No-op when the log is
    /// disabled.
    pub fn close_wal(&self) {
        if let Some(wal) = &self.wal {
            if let Err(err) = wal.close() {
                tracing::error!(error = %err, "error closing write-ahead log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Envelope, EnvelopeFeeExtractor, Payload};

    /// Builds an envelope blob with the given id and fee, the same shape
    /// clients submit.
    fn envelope(tx_id: &str, fee: u64) -> Vec<u8> {
        Envelope::new(
            &Payload {
                tx_id: tx_id.into(),
                fee,
                data: b"invoke:transfer".to_vec(),
            },
            vec![],
        )
        .encode()
    }

    fn test_pool(config: MempoolConfig) -> Mempool {
        Mempool::new(config, 0, Arc::new(EnvelopeFeeExtractor)).unwrap()
    }

    fn default_pool() -> Mempool {
        test_pool(MempoolConfig {
            wal_dir: None,
            ..MempoolConfig::default()
        })
    }

    #[test]
    fn fifo_reap_returns_insertion_prefix() {
        let pool = default_pool();
        let a = envelope("a", 10);
        let b = envelope("b", 3);
        let c = envelope("c", 7);
        for tx in [&a, &b, &c] {
            pool.check_tx(tx, 0).unwrap();
        }

        assert_eq!(pool.reap_max_txs(10), vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(pool.reap_max_txs(2), vec![a.clone(), b.clone()]);
        assert_eq!(pool.reap_max_txs(-1).len(), 3);
        // Reaps are non-destructive.
        assert_eq!(pool.size(), 3);
    }

    #[test]
    fn sorted_reap_orders_by_fee_descending() {
        let pool = default_pool();
        let a = envelope("a", 10);
        let b = envelope("b", 3);
        let c = envelope("c", 7);
        for tx in [&a, &b, &c] {
            pool.check_tx(tx, 0).unwrap();
        }

        assert_eq!(pool.reap_max_txs_by_sort(10), vec![a.clone(), c.clone(), b.clone()]);
        assert_eq!(pool.reap_max_txs_by_sort(1), vec![a.clone()]);
    }

    #[test]
    fn sorted_reap_breaks_ties_by_insertion_order() {
        let pool = default_pool();
        let first = envelope("first", 5);
        let second = envelope("second", 5);
        let third = envelope("third", 5);
        for tx in [&first, &second, &third] {
            pool.check_tx(tx, 0).unwrap();
        }
        assert_eq!(
            pool.reap_max_txs_by_sort(10),
            vec![first, second, third],
            "equal fees must keep arrival order"
        );
    }

    #[test]
    fn full_pool_rejects_by_count() {
        let pool = test_pool(MempoolConfig {
            max_size: 2,
            ..MempoolConfig::default()
        });
        pool.check_tx(&envelope("a", 1), 0).unwrap();
        pool.check_tx(&envelope("b", 1), 0).unwrap();
        let err = pool.check_tx(&envelope("c", 1), 0).unwrap_err();
        assert!(matches!(err, MempoolError::Full { size: 2, .. }));
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn full_pool_rejects_by_bytes() {
        let small = envelope("a", 1);
        let pool = test_pool(MempoolConfig {
            max_bytes: small.len() as i64,
            ..MempoolConfig::default()
        });
        pool.check_tx(&small, 0).unwrap();
        let err = pool.check_tx(&envelope("b", 1), 0).unwrap_err();
        assert!(matches!(err, MempoolError::Full { .. }));
        assert_eq!(pool.txs_bytes(), small.len() as i64);
    }

    #[test]
    fn oversized_tx_rejected() {
        let pool = test_pool(MempoolConfig {
            max_tx_bytes: 16,
            ..MempoolConfig::default()
        });
        let err = pool.check_tx(&envelope("way-too-big", 1), 0).unwrap_err();
        assert!(matches!(err, MempoolError::TxTooLarge { max: 16, .. }));
    }

    #[test]
    fn duplicate_rejected_and_sender_recorded() {
        let pool = default_pool();
        let tx = envelope("a", 1);
        pool.check_tx(&tx, 1).unwrap();
        let err = pool.check_tx(&tx, 2).unwrap_err();
        assert!(matches!(err, MempoolError::TxInCache));
        assert_eq!(pool.size(), 1);

        let entry = pool.entry(&tx_key(&tx)).unwrap();
        assert!(entry.has_sender(1));
        assert!(entry.has_sender(2));
        assert_eq!(entry.sender_count(), 2);
    }

    #[test]
    fn pre_check_filter_rejects() {
        let pool = default_pool();
        let lock = pool.lock_updates();
        pool.update(
            &lock,
            1,
            &[],
            Some(Box::new(|_tx: &[u8]| Err("endorsement quorum not met".into()))),
            None,
        )
        .unwrap();
        drop(lock);

        let err = pool.check_tx(&envelope("a", 1), 0).unwrap_err();
        assert!(matches!(err, MempoolError::PreCheckFailed(_)));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn update_removes_from_pool_but_keeps_cache() {
        let pool = default_pool();
        let a = envelope("a", 2);
        let b = envelope("b", 1);
        pool.check_tx(&a, 0).unwrap();
        pool.check_tx(&b, 0).unwrap();

        let lock = pool.lock_updates();
        pool.update(&lock, 5, std::slice::from_ref(&a), None, None).unwrap();
        drop(lock);

        assert_eq!(pool.height(), 5);
        assert_eq!(pool.size(), 1);
        assert!(!pool.reap_max_txs(10).contains(&a));

        // Replay of the committed transaction is still rejected.
        let err = pool.check_tx(&a, 0).unwrap_err();
        assert!(matches!(err, MempoolError::TxInCache));
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn update_tolerates_unknown_txs() {
        let pool = default_pool();
        pool.check_tx(&envelope("a", 1), 0).unwrap();
        let lock = pool.lock_updates();
        pool.update(&lock, 2, &[envelope("never-admitted", 9)], None, None)
            .unwrap();
        drop(lock);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn explicit_removal_with_cache_forget_allows_readmission() {
        let pool = default_pool();
        let tx = envelope("a", 1);
        pool.check_tx(&tx, 0).unwrap();

        pool.remove_tx_by_key(tx_key(&tx), true);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.txs_bytes(), 0);

        pool.check_tx(&tx, 0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn cache_eviction_does_not_double_admit_pooled_tx() {
        // Cache of one entry: admitting "b" evicts "a" from the cache while
        // "a" is still pooled. Resubmitting "a" must not duplicate it.
        let pool = test_pool(MempoolConfig {
            cache_size: 1,
            ..MempoolConfig::default()
        });
        let a = envelope("a", 1);
        let b = envelope("b", 1);
        pool.check_tx(&a, 0).unwrap();
        pool.check_tx(&b, 0).unwrap();

        let err = pool.check_tx(&a, 3).unwrap_err();
        assert!(matches!(err, MempoolError::TxInCache));
        assert_eq!(pool.size(), 2);
        assert!(pool.entry(&tx_key(&a)).unwrap().has_sender(3));
    }

    #[test]
    fn reap_max_bytes_max_gas_returns_fitting_prefix() {
        let pool = default_pool();
        let a = envelope("a", 4);
        let b = envelope("b", 5);
        let c = envelope("c", 6);
        for tx in [&a, &b, &c] {
            pool.check_tx(tx, 0).unwrap();
        }

        // Byte budget for exactly the first two.
        let budget = (a.len() + b.len()) as i64;
        assert_eq!(pool.reap_max_bytes_max_gas(budget, -1), vec![a.clone(), b.clone()]);

        // Gas budget cuts after the first two (4 + 5 <= 9 < 4 + 5 + 6).
        assert_eq!(pool.reap_max_bytes_max_gas(-1, 9), vec![a.clone(), b.clone()]);

        // Negative limits disable both checks.
        assert_eq!(pool.reap_max_bytes_max_gas(-1, -1).len(), 3);
    }

    #[test]
    fn bounds_hold_after_every_operation() {
        let pool = test_pool(MempoolConfig {
            max_size: 8,
            ..MempoolConfig::default()
        });
        for i in 0..32u32 {
            let _ = pool.check_tx(&envelope(&format!("tx-{i}"), u64::from(i)), 0);
            assert!(pool.size() <= 8);
            assert!(pool.txs_bytes() <= MempoolConfig::default().max_bytes);
        }
        let reaped = pool.reap_max_txs(4);
        let lock = pool.lock_updates();
        pool.update(&lock, 1, &reaped, None, None).unwrap();
        drop(lock);
        assert!(pool.size() <= 8);
    }

    #[test]
    fn flush_clears_pool_and_cache() {
        let pool = default_pool();
        let tx = envelope("a", 1);
        pool.check_tx(&tx, 0).unwrap();
        pool.flush();

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.txs_bytes(), 0);
        // The cache was reset too, so the same bytes are admissible again.
        pool.check_tx(&tx, 0).unwrap();
    }

    #[test]
    fn garbage_tx_is_admitted_with_zero_fee() {
        let pool = default_pool();
        let garbage = b"definitely not an envelope".to_vec();
        pool.check_tx(&garbage, 0).unwrap();
        let entry = pool.entry(&tx_key(&garbage)).unwrap();
        assert_eq!(entry.fee_weight(), 0);
        // Zero-fee entries sort last.
        pool.check_tx(&envelope("paid", 5), 0).unwrap();
        let sorted = pool.reap_max_txs_by_sort(10);
        assert_eq!(sorted[1], garbage);
    }

    #[test]
    fn availability_signal_fires_once_per_height() {
        let mut pool = default_pool();
        let mut rx = pool.enable_txs_available();
        let pool = pool; // shared from here on

        pool.check_tx(&envelope("a", 1), 0).unwrap();
        assert!(rx.try_recv().is_ok(), "empty -> non-empty must signal");

        pool.check_tx(&envelope("b", 1), 0).unwrap();
        assert!(rx.try_recv().is_err(), "suppressed until the next commit");

        let reaped = pool.reap_max_txs(1);
        let lock = pool.lock_updates();
        pool.update(&lock, 1, &reaped, None, None).unwrap();
        drop(lock);
        // Commit left one entry behind and re-armed the edge.
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn update_installs_filters() {
        let pool = default_pool();
        assert!(!pool.post_check_installed());
        let lock = pool.lock_updates();
        pool.update(&lock, 1, &[], None, Some(Box::new(|_tx: &[u8]| Ok(()))))
            .unwrap();
        drop(lock);
        assert!(pool.post_check_installed());
    }

    #[test]
    fn recheck_span_marked_when_enabled() {
        let pool = test_pool(MempoolConfig {
            recheck: true,
            ..MempoolConfig::default()
        });
        let a = envelope("a", 1);
        pool.check_tx(&a, 0).unwrap();
        pool.check_tx(&envelope("b", 1), 0).unwrap();

        let lock = pool.lock_updates();
        pool.update(&lock, 1, std::slice::from_ref(&a), None, None).unwrap();
        drop(lock);

        let (front, back) = pool.take_recheck_span().expect("survivors marked");
        assert!(front <= back);
        assert!(pool.take_recheck_span().is_none(), "span is consumed");
    }

    #[test]
    fn wal_records_accepted_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(MempoolConfig {
            wal_dir: Some(dir.path().join("mempool")),
            ..MempoolConfig::default()
        });
        let tx = envelope("a", 1);
        pool.check_tx(&tx, 0).unwrap();

        let wal = std::fs::read(dir.path().join("mempool").join("wal")).unwrap();
        let mut expected = tx.clone();
        expected.push(b'\n');
        assert_eq!(wal, expected);
    }

    #[test]
    fn concurrent_admissions_respect_bounds_and_uniqueness() {
        let pool = Arc::new(test_pool(MempoolConfig {
            max_size: 64,
            ..MempoolConfig::default()
        }));
        let mut handles = Vec::new();
        for sender in 0..4u16 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for i in 0..100u32 {
                    // Every thread submits the same 100 transactions.
                    let _ = pool.check_tx(&envelope(&format!("tx-{i}"), u64::from(i)), sender);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.size() <= 64);
        let reaped = pool.reap_max_txs(-1);
        let unique: std::collections::HashSet<_> = reaped.iter().map(|tx| tx_key(tx)).collect();
        assert_eq!(unique.len(), reaped.len(), "no fingerprint twice");
    }
}
