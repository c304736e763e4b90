//! Prometheus metrics for the staging service.
//!
//! Registered in a dedicated registry and rendered at `/metrics` on the
//! metrics port. The gauges mirror the pool's own counters; handlers update
//! them after every admission and pull.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metric handles for the service.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Current number of transactions in the pool.
    pub mempool_size: IntGauge,
    /// Size distribution of admitted transactions, in bytes.
    pub tx_size_bytes: Histogram,
    /// Transactions accepted since startup.
    pub transactions_submitted_total: IntCounter,
    /// Transactions rejected at admission since startup.
    pub transactions_rejected_total: IntCounter,
    /// Batches handed to orderers since startup.
    pub batches_fetched_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers every metric. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("stagepool".into()), None)
            .expect("failed to create prometheus registry");

        let mempool_size = IntGauge::new(
            "mempool_size",
            "Current number of transactions in the pool",
        )
        .expect("metric creation");
        registry
            .register(Box::new(mempool_size.clone()))
            .expect("metric registration");

        let tx_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "tx_size_bytes",
                "Size distribution of admitted transactions in bytes",
            )
            .buckets(vec![
                64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(tx_size_bytes.clone()))
            .expect("metric registration");

        let transactions_submitted_total = IntCounter::new(
            "transactions_submitted_total",
            "Transactions accepted since startup",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_submitted_total.clone()))
            .expect("metric registration");

        let transactions_rejected_total = IntCounter::new(
            "transactions_rejected_total",
            "Transactions rejected at admission since startup",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_rejected_total.clone()))
            .expect("metric registration");

        let batches_fetched_total = IntCounter::new(
            "batches_fetched_total",
            "Batches handed to orderers since startup",
        )
        .expect("metric creation");
        registry
            .register(Box::new(batches_fetched_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            mempool_size,
            tx_size_bytes,
            transactions_submitted_total,
            transactions_rejected_total,
            batches_fetched_total,
        }
    }

    /// Renders every registered metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metric handles for axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler rendering `/metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let metrics = NodeMetrics::new();
        metrics.mempool_size.set(3);
        metrics.transactions_submitted_total.inc();
        metrics.tx_size_bytes.observe(512.0);

        let body = metrics.encode().unwrap();
        assert!(body.contains("stagepool_mempool_size 3"));
        assert!(body.contains("stagepool_transactions_submitted_total 1"));
        assert!(body.contains("stagepool_tx_size_bytes_bucket"));
    }
}
