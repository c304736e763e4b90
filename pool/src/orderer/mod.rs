//! Orderer fan-out: one streaming client per configured ordering node.
//!
//! Clients are constructed once at startup by the [`Fetcher`] and live until
//! process exit; a broken stream is redialed in place, never reconstructed
//! from scratch. Each client owns its stream exclusively and serializes
//! sends, so at most one envelope is in flight per orderer at any moment.

mod client;
mod fetcher;

pub use client::{OrdererClient, OrdererInfo};
pub use fetcher::Fetcher;
