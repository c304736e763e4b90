// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Stagepool — Transaction-Staging Core
//!
//! Stagepool sits between endorsing clients and a fleet of ordering nodes in
//! a permissioned ledger. Clients push endorsed transaction blobs in at high
//! rate; orderers pull tailored batches out when they are ready to cut a
//! block. In between, this crate keeps the pending set deduplicated, bounded,
//! ordered, audited, and accounted for.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of a
//! staging service:
//!
//! - **mempool** — The concurrent transaction pool: insertion-ordered store,
//!   duplicate cache, byte/count bounds, write-ahead audit log, reap and
//!   commit protocol.
//! - **orderer** — One streaming client per configured orderer, plus the
//!   registry that owns them. Serialized sends, reconnection, and
//!   arbitrary-precision fee accounting.
//! - **dispatch** — The pull path: reap a batch for a requesting orderer,
//!   credit fees under the live distribution rule, commit the removal.
//! - **wire** — The envelope codec and the framed stream protocol spoken to
//!   orderers. Hand-rolled, length-prefixed, no serde on the hot path.
//! - **config** — File/env configuration and the runtime-mutable policy
//!   switches (distribution rule, sort policy, per-orderer capacity).
//! - **error** — One `thiserror` enum per concern. Errors carry enough
//!   context to be logged once, at the boundary.
//!
//! ## Guarantees
//!
//! A transaction accepted by [`mempool::Mempool::check_tx`] is unique by
//! SHA-256 fingerprint, appears in reaps in insertion order (or fee order,
//! when the sort switch is on), and is removed exactly once by a subsequent
//! commit. Fees distributed across orderers conserve the original amount to
//! the unit, whichever distribution rule is active.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod mempool;
pub mod orderer;
pub mod wire;
