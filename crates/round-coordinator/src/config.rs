use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoordinatorError, Result};

/// Where the share ledger lives.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Sqlite { path: PathBuf },
    /// In-process SQLite database, gone when the process exits.
    SqliteMemory,
    Redis { url: String },
}

/// Which proof-of-work check the submission validator delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofBackend {
    /// Trust the worker's `valid` flag (defaults to true when absent).
    Claimed,
    /// Require the hash's leading zero bits to cover the round target.
    LeadingZeros,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub storage: StorageBackend,
    pub storage_timeout: Duration,
    pub initial_round: u64,
    pub initial_difficulty: f64,
    pub proof_backend: ProofBackend,
    pub persist_rounds: bool,
    pub track_miner_proxy: bool,
    pub recent_limit: usize,
    pub hash_rate_window: Duration,
    pub monitor_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Sqlite {
                path: PathBuf::from("data/shares.db"),
            },
            storage_timeout: Duration::from_millis(5_000),
            initial_round: 1,
            initial_difficulty: 1.0,
            proof_backend: ProofBackend::Claimed,
            persist_rounds: false,
            track_miner_proxy: false,
            recent_limit: 10,
            hash_rate_window: Duration::from_secs(600),
            monitor_interval: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    /// Config suitable for tests and local experiments: in-memory ledger.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageBackend::SqliteMemory,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_difficulty.is_finite() || self.initial_difficulty <= 0.0 {
            return Err(CoordinatorError::Configuration(format!(
                "initial difficulty must be a positive number, got {}",
                self.initial_difficulty
            )));
        }
        if self.storage_timeout.is_zero() {
            return Err(CoordinatorError::Configuration(
                "storage timeout must be non-zero".to_string(),
            ));
        }
        if self.hash_rate_window.is_zero() || self.monitor_interval.is_zero() {
            return Err(CoordinatorError::Configuration(
                "hash rate window and monitor interval must be non-zero".to_string(),
            ));
        }
        if self.recent_limit == 0 {
            return Err(CoordinatorError::Configuration(
                "recent share limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
