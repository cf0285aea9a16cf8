use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ShareId = i64;

/// One recorded submission attempt. `id` and `timestamp` are assigned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub round_number: u64,
    pub timestamp: i64,
    pub hash: String,
    pub difficulty: f64,
    pub valid: bool,
    pub block_height: u64,
    pub worker_id: String,
    pub submission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
}

/// A classified submission ready to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewShare {
    pub round_number: u64,
    pub hash: String,
    pub difficulty: f64,
    pub valid: bool,
    pub block_height: u64,
    pub worker_id: String,
    pub submission_id: String,
    pub reject_reason: Option<String>,
}

impl NewShare {
    pub fn into_share(self, id: ShareId, timestamp: i64) -> Share {
        Share {
            id,
            round_number: self.round_number,
            timestamp,
            hash: self.hash,
            difficulty: self.difficulty,
            valid: self.valid,
            block_height: self.block_height,
            worker_id: self.worker_id,
            submission_id: self.submission_id,
            reject_reason: self.reject_reason,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStats {
    pub total_shares: u64,
    pub valid_shares: u64,
    pub invalid_shares: u64,
    pub unique_workers: u64,
}

/// Sum of work recorded by valid shares since some instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkSummary {
    pub valid_shares: u64,
    pub total_difficulty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub round_number: u64,
    pub target_difficulty: f64,
    pub started_at: DateTime<Utc>,
}

impl Round {
    pub fn new(round_number: u64, target_difficulty: f64) -> Self {
        Self {
            round_number,
            target_difficulty,
            started_at: Utc::now(),
        }
    }
}
