pub mod redis_store;
pub mod schema;
pub mod sqlite_store;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CoordinatorConfig, StorageBackend};
use crate::error::Result;

pub use redis_store::RedisStore;
pub use schema::{NewShare, Round, Share, ShareId, ShareStats, WorkSummary};
pub use sqlite_store::SqliteStore;

/// Durable append-only share storage.
///
/// `append` is the only mutating share operation. Implementations serialize id
/// assignment so ids form the gap-free sequence `1..=N`, commit each row
/// atomically, and answer every read from a single consistent snapshot.
#[async_trait]
pub trait ShareLedger: Send + Sync {
    async fn append(&self, share: NewShare) -> Result<ShareId>;

    async fn count_stats(&self, round: Option<u64>) -> Result<ShareStats>;

    /// Most recent shares, highest id first.
    async fn recent(&self, limit: usize) -> Result<Vec<Share>>;

    async fn contains_submission(
        &self,
        round: u64,
        worker_id: &str,
        submission_id: &str,
    ) -> Result<bool>;

    /// Valid work recorded at or after `since` (unix seconds).
    async fn difficulty_since(&self, since: i64) -> Result<WorkSummary>;

    async fn save_round(&self, round: &Round) -> Result<()>;

    async fn load_round(&self) -> Result<Option<Round>>;
}

/// Open the ledger backend named by the config.
pub async fn open_ledger(config: &CoordinatorConfig) -> Result<Arc<dyn ShareLedger>> {
    let ledger: Arc<dyn ShareLedger> = match &config.storage {
        StorageBackend::Sqlite { path } => {
            Arc::new(SqliteStore::open(path, config.storage_timeout)?)
        }
        StorageBackend::SqliteMemory => Arc::new(SqliteStore::in_memory(config.storage_timeout)?),
        StorageBackend::Redis { url } => {
            Arc::new(RedisStore::new(url, config.storage_timeout).await?)
        }
    };
    Ok(ledger)
}
