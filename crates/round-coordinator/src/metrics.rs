use std::time::Duration;

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use serde::Serialize;

use crate::database::ShareStats;
use crate::error::Result;

/// Live gauges and counters for one coordinator instance.
///
/// Share tallies are advisory: they are bumped per submission and reset to the
/// ledger's totals whenever an audit runs.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    shares_submitted: IntGauge,
    valid_shares: IntGauge,
    invalid_shares: IntGauge,
    storage_failures: IntCounter,
    hash_rate: Gauge,
    cpu_usage: Gauge,
    memory_usage: Gauge,
    current_round: IntGauge,
    submission_seconds: Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hash_rate: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub shares_submitted: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let shares_submitted = IntGauge::new(
            "coordinator_shares_submitted",
            "Shares recorded in the ledger",
        )?;
        let valid_shares = IntGauge::new("coordinator_valid_shares", "Shares recorded as valid")?;
        let invalid_shares =
            IntGauge::new("coordinator_invalid_shares", "Shares recorded as invalid")?;
        let storage_failures = IntCounter::new(
            "coordinator_storage_failures_total",
            "Ledger appends that failed after retry",
        )?;
        let hash_rate = Gauge::new(
            "coordinator_hash_rate_hps",
            "Estimated hash rate from recent valid shares in H/s",
        )?;
        let cpu_usage = Gauge::new("coordinator_cpu_usage", "Process CPU usage percentage")?;
        let memory_usage =
            Gauge::new("coordinator_memory_usage_mb", "Process resident memory in MB")?;
        let current_round = IntGauge::new("coordinator_round", "Current mining round number")?;
        let submission_seconds = Histogram::with_opts(HistogramOpts::new(
            "coordinator_submission_seconds",
            "Time to validate and record a submission",
        ))?;

        registry.register(Box::new(shares_submitted.clone()))?;
        registry.register(Box::new(valid_shares.clone()))?;
        registry.register(Box::new(invalid_shares.clone()))?;
        registry.register(Box::new(storage_failures.clone()))?;
        registry.register(Box::new(hash_rate.clone()))?;
        registry.register(Box::new(cpu_usage.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;
        registry.register(Box::new(current_round.clone()))?;
        registry.register(Box::new(submission_seconds.clone()))?;

        Ok(Self {
            registry,
            shares_submitted,
            valid_shares,
            invalid_shares,
            storage_failures,
            hash_rate,
            cpu_usage,
            memory_usage,
            current_round,
            submission_seconds,
        })
    }

    /// Call only after the share is durable in the ledger.
    pub fn record_share(&self, valid: bool) {
        self.shares_submitted.inc();
        if valid {
            self.valid_shares.inc();
        } else {
            self.invalid_shares.inc();
        }
    }

    pub fn reconcile(&self, stats: &ShareStats) {
        self.shares_submitted.set(stats.total_shares as i64);
        self.valid_shares.set(stats.valid_shares as i64);
        self.invalid_shares.set(stats.invalid_shares as i64);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.inc();
    }

    pub fn observe_submission(&self, elapsed: Duration) {
        self.submission_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn set_hash_rate(&self, hashes_per_second: f64) {
        self.hash_rate.set(hashes_per_second);
    }

    pub fn set_resources(&self, cpu_percent: f64, memory_mb: f64) {
        self.cpu_usage.set(cpu_percent);
        self.memory_usage.set(memory_mb);
    }

    pub fn set_round(&self, round_number: u64) {
        self.current_round.set(round_number as i64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hash_rate: self.hash_rate.get(),
            cpu_usage: self.cpu_usage.get(),
            memory_usage: self.memory_usage.get(),
            shares_submitted: self.shares_submitted.get().max(0) as u64,
            valid_shares: self.valid_shares.get().max(0) as u64,
            invalid_shares: self.invalid_shares.get().max(0) as u64,
        }
    }

    /// Prometheus text exposition of every metric in this registry.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn record_share_splits_by_validity() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.record_share(true);
        metrics.record_share(true);
        metrics.record_share(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.shares_submitted, 3);
        assert_eq!(snapshot.valid_shares, 2);
        assert_eq!(snapshot.invalid_shares, 1);
    }

    #[test]
    fn reconcile_overwrites_advisory_tallies() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.record_share(true);
        metrics.reconcile(&ShareStats {
            total_shares: 10,
            valid_shares: 7,
            invalid_shares: 3,
            unique_workers: 2,
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.shares_submitted, 10);
        assert_eq!(snapshot.valid_shares, 7);
        assert_eq!(snapshot.invalid_shares, 3);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record_share(true);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(metrics.snapshot().shares_submitted, 8_000);
    }

    #[test]
    fn registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.record_share(true);
        assert_eq!(b.snapshot().shares_submitted, 0);
    }

    #[test]
    fn render_exposes_prometheus_text() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.set_round(4);
        metrics.set_hash_rate(12.5);

        let text = metrics.render().unwrap();
        assert!(text.contains("coordinator_round 4"));
        assert!(text.contains("coordinator_hash_rate_hps 12.5"));
        assert!(text.contains("coordinator_submission_seconds_bucket"));
    }
}
