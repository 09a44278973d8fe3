//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transfers_total` - Total number of applied transfers
//! - `ledger_blocks_total` - Total number of appended blocks
//! - `ledger_account_keys_total` - Total number of registered keys
//! - `ledger_op_duration_seconds` - Histogram of operation latencies,
//!   labelled by operation
//!
//! Each instance carries its own registry, so several ledgers in one
//! process never collide on metric names.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, Registry};

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total transfers applied
    pub transfers_total: IntCounter,

    /// Total blocks appended
    pub blocks_total: IntCounter,

    /// Total account keys registered
    pub keys_total: IntCounter,

    /// Operation latency histogram, labelled by operation
    pub op_duration: HistogramVec,

    /// Prometheus registry
    registry: Registry,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let transfers_total = IntCounter::new(
            "ledger_transfers_total",
            "Total number of applied transfers",
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let blocks_total =
            IntCounter::new("ledger_blocks_total", "Total number of appended blocks")?;
        registry.register(Box::new(blocks_total.clone()))?;

        let keys_total = IntCounter::new(
            "ledger_account_keys_total",
            "Total number of registered account keys",
        )?;
        registry.register(Box::new(keys_total.clone()))?;

        let op_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_op_duration_seconds",
                "Histogram of operation latencies",
            )
            .buckets(vec![
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0,
            ]),
            &["op"],
        )?;
        registry.register(Box::new(op_duration.clone()))?;

        Ok(Self {
            transfers_total,
            blocks_total,
            keys_total,
            op_duration,
            registry,
        })
    }

    /// Record an applied transfer
    pub fn record_transfer(&self) {
        self.transfers_total.inc();
    }

    /// Record an appended block
    pub fn record_block_append(&self) {
        self.blocks_total.inc();
    }

    /// Record a registered key
    pub fn record_key_registered(&self) {
        self.keys_total.inc();
    }

    /// Record an operation latency
    pub fn observe_op(&self, op: &str, seconds: f64) {
        self.op_duration.with_label_values(&[op]).observe(seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create metrics")
    }
}
