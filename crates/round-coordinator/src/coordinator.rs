use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::database::{open_ledger, NewShare, Round, Share, ShareId, ShareLedger, ShareStats};
use crate::error::{CoordinatorError, Result};
use crate::health::{Component, HealthAggregator, HealthSnapshot};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::rounds::{RoundManager, RoundParameters};
use crate::shares::{proof_backend, ProofOfWork, ShareValidation, SubmissionValidator};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDescriptor {
    pub round_number: u64,
    pub target_difficulty: f64,
    pub hash_rate: f64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub statistics: ShareStats,
    pub recent_shares: Vec<Share>,
}

/// Outcome of a processed submission. Duplicates and proof failures are
/// recorded too; `validation` says how the share was classified.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub share_id: ShareId,
    pub round_number: u64,
    pub validation: ShareValidation,
}

/// Owns every component of one coordinator instance and wires them together.
pub struct RoundCoordinator {
    ledger: Arc<dyn ShareLedger>,
    rounds: RoundManager,
    validator: SubmissionValidator,
    metrics: MetricsRegistry,
    health: HealthAggregator,
    // Held across duplicate lookup + append, and across audit + reconcile
    write_gate: Mutex<()>,
    // Held across round advance + persistence
    round_gate: Mutex<()>,
    config: CoordinatorConfig,
}

impl RoundCoordinator {
    pub async fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let ledger = open_ledger(&config).await?;
        let proof = proof_backend(config.proof_backend);
        Self::with_parts(config, ledger, proof).await
    }

    /// Build around an existing ledger and proof backend.
    pub async fn with_parts(
        config: CoordinatorConfig,
        ledger: Arc<dyn ShareLedger>,
        proof: Arc<dyn ProofOfWork>,
    ) -> Result<Self> {
        config.validate()?;

        let mut components = vec![Component::Ledger, Component::Metrics, Component::Api];
        if config.track_miner_proxy {
            components.push(Component::MinerProxy);
        }
        let health = HealthAggregator::new(&components);

        let metrics = MetricsRegistry::new()?;
        health.mark_ready(Component::Metrics)?;

        let initial = if config.persist_rounds {
            ledger.load_round().await?
        } else {
            None
        };
        let initial = match initial {
            Some(round) => {
                info!("Resuming persisted round {}", round.round_number);
                round
            }
            None => Round::new(config.initial_round, config.initial_difficulty),
        };
        metrics.set_round(initial.round_number);

        // Seed advisory tallies from whatever the ledger already holds
        metrics.reconcile(&ledger.count_stats(None).await?);
        health.mark_ready(Component::Ledger)?;

        let validator = SubmissionValidator::new(ledger.clone(), proof);
        info!(
            "Coordinator ready at round {} (proof check '{}')",
            initial.round_number,
            validator.proof_name()
        );

        Ok(Self {
            ledger,
            rounds: RoundManager::new(initial),
            validator,
            metrics,
            health,
            write_gate: Mutex::new(()),
            round_gate: Mutex::new(()),
            config,
        })
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn health(&self) -> &HealthAggregator {
        &self.health
    }

    pub fn ledger(&self) -> &Arc<dyn ShareLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn current_round(&self) -> Round {
        self.rounds.current().await
    }

    /// The descriptor always reflects server state; `requested_round` is only logged.
    pub async fn task(&self, requested_round: u64) -> TaskDescriptor {
        let round = self.rounds.current().await;
        if requested_round != round.round_number {
            debug!(
                "Task requested for round {} while round {} is active",
                requested_round, round.round_number
            );
        }

        let snapshot = self.metrics.snapshot();
        TaskDescriptor {
            round_number: round.round_number,
            target_difficulty: round.target_difficulty,
            hash_rate: snapshot.hash_rate,
            valid_shares: snapshot.valid_shares,
            invalid_shares: snapshot.invalid_shares,
        }
    }

    /// Sanitize, classify and record one submission.
    ///
    /// Malformed bodies are rejected before anything is written. Metrics are
    /// only bumped once the append is durable.
    pub async fn submit(&self, round_number: u64, body: &Value) -> Result<SubmissionReceipt> {
        let started = Instant::now();
        let submission = self.validator.sanitize(body)?;
        let current = self.rounds.current().await;

        let _gate = self.write_gate.lock().await;
        let validation = self
            .validator
            .validate(&submission, round_number, &current)
            .await
            .map_err(|e| self.storage_fault(e))?;

        let share = NewShare {
            round_number,
            hash: submission.hash,
            difficulty: submission.difficulty,
            valid: validation.is_valid,
            block_height: submission.block_height,
            worker_id: submission.worker_id,
            submission_id: submission.submission_id,
            reject_reason: validation.reason.map(|r| r.as_str().to_string()),
        };
        let share_id = self.append_with_retry(share.clone()).await?;

        self.metrics.record_share(validation.is_valid);
        self.metrics.observe_submission(started.elapsed());
        self.health.mark_ready(Component::Ledger)?;

        match validation.reason {
            None => debug!(
                "Recorded share {} from {} for round {}",
                share_id, share.worker_id, round_number
            ),
            Some(reason) => warn!(
                "Recorded share {} from {} for round {} as invalid ({})",
                share_id,
                share.worker_id,
                round_number,
                reason.as_str()
            ),
        }

        Ok(SubmissionReceipt {
            share_id,
            round_number,
            validation,
        })
    }

    /// One retry on plain storage errors; a timed-out append may have
    /// committed, so it is surfaced as-is.
    async fn append_with_retry(&self, share: NewShare) -> Result<ShareId> {
        match self.ledger.append(share.clone()).await {
            Ok(id) => Ok(id),
            Err(CoordinatorError::Storage(reason)) => {
                warn!("Ledger append failed, retrying once: {}", reason);
                self.ledger
                    .append(share)
                    .await
                    .map_err(|e| self.storage_fault(e))
            }
            Err(e) => Err(self.storage_fault(e)),
        }
    }

    fn storage_fault(&self, err: CoordinatorError) -> CoordinatorError {
        if err.is_storage() {
            error!("Share ledger failure: {}", err);
            self.metrics.record_storage_failure();
            if let Err(e) = self.health.mark_faulted(Component::Ledger) {
                error!("Could not record ledger fault: {}", e);
            }
        }
        err
    }

    /// Aggregate statistics plus the most recent shares. An unfiltered audit
    /// also resets the advisory metric tallies to the ledger's totals.
    pub async fn audit(&self, round: Option<u64>) -> Result<AuditReport> {
        let statistics = match round {
            Some(_) => self.ledger.count_stats(round).await,
            None => {
                let _gate = self.write_gate.lock().await;
                let stats = self.ledger.count_stats(None).await;
                if let Ok(stats) = &stats {
                    self.metrics.reconcile(stats);
                }
                stats
            }
        }
        .map_err(|e| self.storage_fault(e))?;

        let recent_shares = self
            .ledger
            .recent(self.config.recent_limit)
            .await
            .map_err(|e| self.storage_fault(e))?;
        self.health.mark_ready(Component::Ledger)?;

        Ok(AuditReport {
            statistics,
            recent_shares,
        })
    }

    pub async fn advance_round(&self, params: RoundParameters) -> Result<Round> {
        let _gate = self.round_gate.lock().await;
        let round = self.rounds.advance(params).await?;
        self.metrics.set_round(round.round_number);

        if self.config.persist_rounds {
            self.ledger
                .save_round(&round)
                .await
                .map_err(|e| self.storage_fault(e))?;
        }
        Ok(round)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Recompute the hash-rate gauge from valid work in the configured window.
    pub async fn refresh_hash_rate(&self) -> Result<f64> {
        let window = self.config.hash_rate_window;
        let since = Utc::now().timestamp() - window.as_secs() as i64;
        let work = self
            .ledger
            .difficulty_since(since)
            .await
            .map_err(|e| self.storage_fault(e))?;
        self.health.mark_ready(Component::Ledger)?;

        let hash_rate = work.total_difficulty / window.as_secs_f64();
        self.metrics.set_hash_rate(hash_rate);
        Ok(hash_rate)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::database::{SqliteStore, WorkSummary};
    use crate::shares::{ClaimedValidity, RejectReason};

    async fn coordinator() -> RoundCoordinator {
        RoundCoordinator::new(CoordinatorConfig::in_memory()).await.unwrap()
    }

    fn body(submission_id: &str) -> Value {
        json!({
            "hash": "0000000000000000000000000000000000000000000000000000000000000000",
            "difficulty": 1.0,
            "block_height": 1,
            "worker_id": "w1",
            "submission_id": submission_id,
        })
    }

    #[tokio::test]
    async fn records_valid_submission() {
        let coordinator = coordinator().await;
        let receipt = coordinator.submit(1, &body("s1")).await.unwrap();
        assert_eq!(receipt.share_id, 1);
        assert!(receipt.validation.is_valid);

        let audit = coordinator.audit(None).await.unwrap();
        assert_eq!(audit.statistics.total_shares, 1);
        assert_eq!(audit.statistics.valid_shares, 1);
        assert_eq!(audit.recent_shares[0].worker_id, "w1");
    }

    #[tokio::test]
    async fn duplicate_is_recorded_invalid() {
        let coordinator = coordinator().await;
        coordinator.submit(1, &body("s1")).await.unwrap();
        let second = coordinator.submit(1, &body("s1")).await.unwrap();

        assert_eq!(
            second.validation,
            ShareValidation::rejected(RejectReason::Duplicate)
        );
        let stats = coordinator.audit(None).await.unwrap().statistics;
        assert_eq!(stats.total_shares, 2);
        assert_eq!(stats.valid_shares, 1);
        assert_eq!(stats.invalid_shares, 1);
    }

    #[tokio::test]
    async fn concurrent_duplicates_only_accept_one() {
        let coordinator = Arc::new(coordinator().await);
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.submit(1, &body("same")).await.unwrap() })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().validation.is_valid {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(coordinator.stats().shares_submitted, 10);
    }

    #[tokio::test]
    async fn malformed_submission_never_reaches_ledger() {
        let coordinator = coordinator().await;
        let err = coordinator.submit(1, &json!({ "hash": "x" })).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::MalformedSubmission { .. }));
        assert_eq!(coordinator.audit(None).await.unwrap().statistics.total_shares, 0);
        assert_eq!(coordinator.stats().shares_submitted, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn rejections_are_logged_without_faults() {
        let coordinator = coordinator().await;
        let _ = coordinator.submit(1, &json!({ "hash": "x" })).await;
        coordinator.submit(1, &body("s1")).await.unwrap();
        coordinator.submit(1, &body("s1")).await.unwrap();

        assert!(logs_contain("as invalid (duplicate)"));
        assert!(!logs_contain("Share ledger failure"));
    }

    #[tokio::test]
    async fn task_reflects_server_round() {
        let coordinator = coordinator().await;
        coordinator.submit(1, &body("s1")).await.unwrap();

        let task = coordinator.task(42).await;
        assert_eq!(task.round_number, 1);
        assert_eq!(task.target_difficulty, 1.0);
        assert_eq!(task.valid_shares, 1);
        assert_eq!(task.invalid_shares, 0);
    }

    #[tokio::test]
    async fn advancing_keeps_prior_shares() {
        let coordinator = coordinator().await;
        coordinator.submit(1, &body("s1")).await.unwrap();
        coordinator.submit(1, &body("s2")).await.unwrap();

        let round = coordinator
            .advance_round(RoundParameters {
                target_difficulty: 2.0,
            })
            .await
            .unwrap();
        assert_eq!(round.round_number, 2);
        coordinator.submit(2, &body("s1")).await.unwrap();

        let audit = coordinator.audit(None).await.unwrap();
        let rounds: Vec<u64> = audit.recent_shares.iter().map(|s| s.round_number).collect();
        assert_eq!(rounds, vec![2, 1, 1]);
        assert_eq!(coordinator.audit(Some(1)).await.unwrap().statistics.total_shares, 2);
        // s1 in round 2 is a fresh key
        assert_eq!(audit.statistics.valid_shares, 3);
    }

    #[tokio::test]
    async fn rejected_advance_keeps_round() {
        let coordinator = coordinator().await;
        let err = coordinator
            .advance_round(RoundParameters {
                target_difficulty: 0.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidParameters(_)));
        assert_eq!(coordinator.current_round().await.round_number, 1);
    }

    #[tokio::test]
    async fn persisted_round_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            storage: crate::config::StorageBackend::Sqlite {
                path: dir.path().join("shares.db"),
            },
            persist_rounds: true,
            ..CoordinatorConfig::default()
        };

        {
            let coordinator = RoundCoordinator::new(config.clone()).await.unwrap();
            coordinator
                .advance_round(RoundParameters {
                    target_difficulty: 8.0,
                })
                .await
                .unwrap();
        }

        let coordinator = RoundCoordinator::new(config).await.unwrap();
        let round = coordinator.current_round().await;
        assert_eq!(round.round_number, 2);
        assert_eq!(round.target_difficulty, 8.0);
    }

    #[tokio::test]
    async fn audit_reconciles_metrics() {
        let coordinator = coordinator().await;
        coordinator.submit(1, &body("s1")).await.unwrap();
        coordinator.metrics().reconcile(&ShareStats::default());
        assert_eq!(coordinator.stats().shares_submitted, 0);

        coordinator.audit(None).await.unwrap();
        assert_eq!(coordinator.stats().shares_submitted, 1);
        assert_eq!(coordinator.stats().valid_shares, 1);
    }

    #[tokio::test]
    async fn hash_rate_tracks_recent_valid_work() {
        let coordinator = coordinator().await;
        coordinator.submit(1, &body("s1")).await.unwrap();
        coordinator.submit(1, &body("s2")).await.unwrap();

        let window = coordinator.config().hash_rate_window.as_secs_f64();
        let rate = coordinator.refresh_hash_rate().await.unwrap();
        assert_eq!(rate, 2.0 / window);
        assert_eq!(coordinator.task(1).await.hash_rate, rate);
    }

    #[tokio::test]
    async fn successful_reads_clear_a_ledger_fault() {
        let coordinator = coordinator().await;
        coordinator.health().mark_ready(Component::Api).unwrap();

        coordinator.health().mark_faulted(Component::Ledger).unwrap();
        coordinator.refresh_hash_rate().await.unwrap();
        assert_eq!(coordinator.health_snapshot().status, "healthy");

        coordinator.health().mark_faulted(Component::Ledger).unwrap();
        coordinator.audit(Some(1)).await.unwrap();
        assert_eq!(
            coordinator.health().state(Component::Ledger),
            Some(crate::health::ComponentState::Ready)
        );
    }

    /// Ledger that fails the first `failures` appends, then delegates.
    struct FlakyLedger {
        inner: SqliteStore,
        failures: AtomicUsize,
        timeout: bool,
    }

    impl FlakyLedger {
        fn new(failures: usize, timeout: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: SqliteStore::in_memory(std::time::Duration::from_secs(1)).unwrap(),
                failures: AtomicUsize::new(failures),
                timeout,
            })
        }
    }

    #[async_trait]
    impl ShareLedger for FlakyLedger {
        async fn append(&self, share: NewShare) -> Result<ShareId> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(if self.timeout {
                    CoordinatorError::StorageTimeout(std::time::Duration::from_millis(1))
                } else {
                    CoordinatorError::Storage("database is locked".into())
                });
            }
            self.inner.append(share).await
        }

        async fn count_stats(&self, round: Option<u64>) -> Result<ShareStats> {
            self.inner.count_stats(round).await
        }

        async fn recent(&self, limit: usize) -> Result<Vec<Share>> {
            self.inner.recent(limit).await
        }

        async fn contains_submission(&self, round: u64, worker: &str, id: &str) -> Result<bool> {
            self.inner.contains_submission(round, worker, id).await
        }

        async fn difficulty_since(&self, since: i64) -> Result<WorkSummary> {
            self.inner.difficulty_since(since).await
        }

        async fn save_round(&self, round: &Round) -> Result<()> {
            self.inner.save_round(round).await
        }

        async fn load_round(&self) -> Result<Option<Round>> {
            self.inner.load_round().await
        }
    }

    async fn with_ledger(ledger: Arc<FlakyLedger>) -> RoundCoordinator {
        RoundCoordinator::with_parts(
            CoordinatorConfig::in_memory(),
            ledger,
            Arc::new(ClaimedValidity),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn single_storage_failure_is_retried() {
        let coordinator = with_ledger(FlakyLedger::new(1, false)).await;
        let receipt = coordinator.submit(1, &body("s1")).await.unwrap();
        assert_eq!(receipt.share_id, 1);
        assert_eq!(coordinator.stats().shares_submitted, 1);
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_without_metrics() {
        let coordinator = with_ledger(FlakyLedger::new(2, false)).await;
        let err = coordinator.submit(1, &body("s1")).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(coordinator.stats().shares_submitted, 0);
        assert_eq!(
            coordinator.health().state(Component::Ledger),
            Some(crate::health::ComponentState::Faulted)
        );

        // The ledger recovers on the next durable append
        coordinator.health().mark_ready(Component::Api).unwrap();
        coordinator.submit(1, &body("s2")).await.unwrap();
        assert_eq!(coordinator.health_snapshot().status, "healthy");
    }

    #[tokio::test]
    async fn timeouts_are_not_retried() {
        let ledger = FlakyLedger::new(1, true);
        let coordinator = with_ledger(ledger.clone()).await;
        let err = coordinator.submit(1, &body("s1")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::StorageTimeout(_)));
        assert_eq!(ledger.inner.count_stats(None).await.unwrap().total_shares, 0);
    }
}
