//! The pull path: reap a batch for an orderer, credit fees, commit removal.
//!
//! A pull runs entirely under one exclusive update guard (reap, fee
//! distribution, commit), so two orderers can never receive overlapping
//! batches. Forwarding the batch down the orderer stream is best-effort
//! background work: by the time it runs, the transactions are already
//! removed from the pool, and a transaction whose broadcast fails twice is
//! dropped rather than re-inserted (its fingerprint stays cached, so the
//! submitter cannot double-spend it back in).

use std::sync::Arc;

use num::{BigUint, Zero};
use tracing::{debug, info, warn};

use crate::config::{DistributionHandle, DistributionRule, SortPolicy};
use crate::error::{DispatchError, MempoolError};
use crate::mempool::{FeeExtractor, Mempool};
use crate::orderer::{Fetcher, OrdererClient};

/// Result of a pull, as returned to the RPC caller. The transaction bytes
/// travel on the orderer stream, never inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    /// Number of transactions reaped for this pull.
    pub tx_num: i32,
    /// Whether the pool had fewer transactions than the orderer asked for.
    pub is_empty: bool,
}

/// Per-orderer row for the admin listing.
#[derive(Debug, Clone)]
pub struct OrdererSummary {
    /// Orderer name.
    pub orderer: String,
    /// Requested batch size.
    pub capacity: u32,
    /// Total fee credited, decimal string.
    pub fee_reward: String,
}

/// Wires the mempool to the orderer fleet.
pub struct Dispatcher {
    mempool: Arc<Mempool>,
    fetcher: Fetcher,
    distribution: DistributionHandle,
    sort: SortPolicy,
    fee_extractor: Arc<dyn FeeExtractor>,
    /// When set, reaped batches are forwarded down the orderer stream by a
    /// background task.
    forward: bool,
}

impl Dispatcher {
    /// Assembles the dispatch core.
    pub fn new(
        mempool: Arc<Mempool>,
        fetcher: Fetcher,
        distribution: DistributionHandle,
        sort: SortPolicy,
        fee_extractor: Arc<dyn FeeExtractor>,
        forward: bool,
    ) -> Self {
        Self {
            mempool,
            fetcher,
            distribution,
            sort,
            fee_extractor,
            forward,
        }
    }

    /// The pool behind this dispatcher.
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// The orderer registry behind this dispatcher.
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Admission entry point for the RPC surface.
    pub fn submit_transaction(&self, tx: &[u8], sender_id: u16) -> Result<(), MempoolError> {
        self.mempool.check_tx(tx, sender_id)
    }

    /// Services a pull from the named orderer.
    pub fn fetch_transactions(
        &self,
        requester: &str,
        block_height: u64,
    ) -> Result<FetchSummary, DispatchError> {
        if self.mempool.is_empty() {
            return Ok(FetchSummary {
                tx_num: 0,
                is_empty: true,
            });
        }

        let client = self
            .fetcher
            .get(requester)
            .ok_or_else(|| DispatchError::UnknownOrderer(requester.to_string()))?;
        let expected = i64::from(client.capacity());

        let lock = self.mempool.lock_updates();
        let txs = if self.sort.fee_priority() {
            self.mempool.reap_max_txs_by_sort_locked(&lock, expected)
        } else {
            self.mempool.reap_max_txs_locked(&lock, expected)
        };

        for tx in &txs {
            let fee = match self.fee_extractor.fee_and_id(tx) {
                Ok((fee, _)) => fee,
                Err(err) => {
                    debug!(error = %err, "fee decode failed during dispatch, crediting zero");
                    BigUint::zero()
                }
            };
            self.distribute(&fee, &client);
            if !self.forward {
                client.deal_order();
            }
        }

        self.mempool
            .update(&lock, block_height, &txs, None, None)?;
        drop(lock);

        let tx_num = txs.len();
        info!(
            orderer = %requester,
            actual = tx_num,
            expected,
            pool = self.mempool.size(),
            "orderer fetched transactions"
        );

        if self.forward && !txs.is_empty() {
            tokio::spawn(forward_batch(Arc::clone(&client), txs));
        }

        Ok(FetchSummary {
            tx_num: tx_num as i32,
            is_empty: (tx_num as i64) < expected,
        })
    }

    /// Credits a consumed transaction's fee under the live rule.
    ///
    /// All-to-one gives the whole fee to the dealing orderer. Equal-split
    /// divides it across the fleet and leaves the integer remainder with
    /// the dealing orderer, so no unit of fee is ever truncated away.
    fn distribute(&self, fee: &BigUint, dealing: &Arc<OrdererClient>) {
        match *self.distribution.read() {
            DistributionRule::AllToOne => dealing.add_tax(fee),
            DistributionRule::EqualSplit => {
                let clients = self.fetcher.all();
                if clients.is_empty() {
                    dealing.add_tax(fee);
                    return;
                }
                let n = BigUint::from(clients.len());
                let average = fee / &n;
                let remainder = fee - &n * &average;
                dealing.add_tax(&remainder);
                for client in &clients {
                    client.add_tax(&average);
                }
            }
        }
    }

    /// Accounting line for the named orderer.
    pub fn orderer_report(&self, name: &str) -> Result<String, DispatchError> {
        self.fetcher
            .get(name)
            .map(|client| client.report())
            .ok_or_else(|| DispatchError::UnknownOrderer(name.to_string()))
    }

    /// One summary row per connected orderer.
    pub fn orderer_summaries(&self) -> Vec<OrdererSummary> {
        let mut rows: Vec<OrdererSummary> = self
            .fetcher
            .all()
            .iter()
            .map(|client| OrdererSummary {
                orderer: client.name().to_string(),
                capacity: client.capacity(),
                fee_reward: client.total_tax().to_string(),
            })
            .collect();
        rows.sort_by(|a, b| a.orderer.cmp(&b.orderer));
        rows
    }

    /// Current distribution rule.
    pub fn distribution_rule(&self) -> DistributionRule {
        *self.distribution.read()
    }

    /// Switches the distribution rule. Takes effect on the next pull.
    pub fn set_distribution_rule(&self, rule: DistributionRule) {
        *self.distribution.write() = rule;
        info!(rule = %rule, "distribution rule updated");
    }

    /// Current sort switch position.
    pub fn sort_fee_priority(&self) -> bool {
        self.sort.fee_priority()
    }

    /// Flips the reap ordering between arrival order and fee-descending.
    pub fn set_sort_fee_priority(&self, on: bool) {
        self.sort.set_fee_priority(on);
        info!(fee_priority = on, "sort policy updated");
    }

    /// Updates the named orderer's batch size.
    pub fn set_orderer_capacity(&self, name: &str, capacity: u32) -> Result<(), DispatchError> {
        self.fetcher.set_capacity(name, capacity)?;
        info!(orderer = %name, capacity, "orderer capacity updated");
        Ok(())
    }
}

/// Forwards a committed batch to its orderer, one reconnect+retry per
/// transaction. Transactions that still fail are dropped; they have already
/// left the pool and their fingerprints stay cached.
async fn forward_batch(client: Arc<OrdererClient>, txs: Vec<Vec<u8>>) {
    for tx in txs {
        match client.broadcast(&tx).await {
            Ok(()) => client.deal_order(),
            Err(err) => {
                warn!(orderer = %client.name(), error = %err, "broadcast failed, reconnecting");
                if client.reset_connect().await.is_ok() && client.broadcast(&tx).await.is_ok() {
                    client.deal_order();
                } else {
                    warn!(orderer = %client.name(), "dropping transaction after failed retry");
                }
            }
        }
    }
}
