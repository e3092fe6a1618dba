//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `guild_ledger_entries_total` - Entries committed
//! - `guild_ledger_commit_batch_size` - Histogram of entries per write batch
//! - `guild_ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `guild_ledger_transfers_total` - Successful two-leg transfers
//! - `guild_ledger_insufficient_funds_total` - Spends and transfers refused for overdraft
//! - `guild_ledger_experience_accepted_total` - Experience events recorded
//! - `guild_ledger_experience_rejected_total` - Experience events refused by cooldown

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Entries committed
    pub entries_total: IntCounter,

    /// Batch size histogram
    pub batch_size: Histogram,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Transfers committed
    pub transfers_total: IntCounter,

    /// Overdraft refusals
    pub insufficient_funds_total: IntCounter,

    /// Experience events accepted
    pub experience_accepted: IntCounter,

    /// Experience events rejected
    pub experience_rejected: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total =
            IntCounter::new("guild_ledger_entries_total", "Entries committed")?;
        registry.register(Box::new(entries_total.clone()))?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("guild_ledger_commit_batch_size", "Entries per write batch")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
        )?;
        registry.register(Box::new(batch_size.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new("guild_ledger_commit_duration_seconds", "Commit latency")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let transfers_total =
            IntCounter::new("guild_ledger_transfers_total", "Transfers committed")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let insufficient_funds_total = IntCounter::new(
            "guild_ledger_insufficient_funds_total",
            "Spends and transfers refused for insufficient funds",
        )?;
        registry.register(Box::new(insufficient_funds_total.clone()))?;

        let experience_accepted = IntCounter::new(
            "guild_ledger_experience_accepted_total",
            "Experience events recorded",
        )?;
        registry.register(Box::new(experience_accepted.clone()))?;

        let experience_rejected = IntCounter::new(
            "guild_ledger_experience_rejected_total",
            "Experience events refused by cooldown",
        )?;
        registry.register(Box::new(experience_rejected.clone()))?;

        Ok(Self {
            entries_total,
            batch_size,
            commit_duration,
            transfers_total,
            insufficient_funds_total,
            experience_accepted,
            experience_rejected,
            registry,
        })
    }

    /// Record one committed write batch
    pub fn record_commit(&self, entries: usize, duration_seconds: f64) {
        self.entries_total.inc_by(entries as u64);
        self.batch_size.observe(entries as f64);
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a committed transfer
    pub fn record_transfer(&self) {
        self.transfers_total.inc();
    }

    /// Record an overdraft refusal
    pub fn record_insufficient_funds(&self) {
        self.insufficient_funds_total.inc();
    }

    /// Record an experience decision
    pub fn record_experience(&self, accepted: bool) {
        if accepted {
            self.experience_accepted.inc();
        } else {
            self.experience_rejected.inc();
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.entries_total.get(), 0);
        assert_eq!(metrics.transfers_total.get(), 0);
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_transfer();
        assert_eq!(a.transfers_total.get(), 1);
        assert_eq!(b.transfers_total.get(), 0);
    }

    #[test]
    fn test_record_commit() {
        let metrics = Metrics::new().unwrap();
        metrics.record_commit(2, 0.002);
        metrics.record_commit(1, 0.001);
        assert_eq!(metrics.entries_total.get(), 3);
        assert_eq!(metrics.batch_size.get_sample_count(), 2);
    }

    #[test]
    fn test_record_experience() {
        let metrics = Metrics::new().unwrap();
        metrics.record_experience(true);
        metrics.record_experience(false);
        metrics.record_experience(false);
        assert_eq!(metrics.experience_accepted.get(), 1);
        assert_eq!(metrics.experience_rejected.get(), 2);
        assert_eq!(metrics.registry().gather().len(), 7);
    }
}
