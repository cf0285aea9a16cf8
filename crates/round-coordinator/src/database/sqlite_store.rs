use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::schema::{NewShare, Round, Share, ShareId, ShareStats, WorkSummary};
use super::ShareLedger;
use crate::error::{CoordinatorError, Result};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS shares (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    round_number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    hash TEXT NOT NULL,
    difficulty REAL NOT NULL,
    valid INTEGER NOT NULL,
    block_height INTEGER NOT NULL,
    worker_id TEXT NOT NULL,
    submission_id TEXT NOT NULL,
    reject_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_shares_submission
    ON shares(round_number, worker_id, submission_id);
CREATE INDEX IF NOT EXISTS idx_shares_timestamp ON shares(timestamp);
CREATE TABLE IF NOT EXISTS rounds (
    key TEXT PRIMARY KEY,
    round_number INTEGER NOT NULL,
    target_difficulty REAL NOT NULL,
    started_at_ms INTEGER NOT NULL
);
";

const SHARE_COLUMNS: &str = "id, round_number, timestamp, hash, difficulty, valid, block_height, \
     worker_id, submission_id, reject_reason";

/// SQLite-backed ledger.
///
/// A single connection behind a mutex is the only writer; every statement runs
/// on the blocking pool. Each call, including its wait for the connection, is
/// bounded by the storage timeout; a call that gets the connection after its
/// deadline does nothing.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CoordinatorError::Storage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal mode: {}", mode);

        let store = Self::initialize(conn, timeout)?;
        info!("Share ledger opened at {}", path.display());
        Ok(store)
    }

    pub fn in_memory(timeout: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, timeout)
    }

    fn initialize(conn: Connection, timeout: Duration) -> Result<Self> {
        conn.busy_timeout(timeout)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CoordinatorError::Storage("ledger connection poisoned".to_string()))?;
            if Instant::now() >= deadline {
                return Err(CoordinatorError::StorageTimeout(timeout));
            }
            f(&mut guard)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(result) => result?,
            Err(_) => Err(CoordinatorError::StorageTimeout(timeout)),
        }
    }

    fn row_to_share(row: &rusqlite::Row<'_>) -> rusqlite::Result<Share> {
        Ok(Share {
            id: row.get(0)?,
            round_number: row.get::<_, i64>(1)? as u64,
            timestamp: row.get(2)?,
            hash: row.get(3)?,
            difficulty: row.get(4)?,
            valid: row.get(5)?,
            block_height: row.get::<_, i64>(6)? as u64,
            worker_id: row.get(7)?,
            submission_id: row.get(8)?,
            reject_reason: row.get(9)?,
        })
    }
}

#[async_trait]
impl ShareLedger for SqliteStore {
    async fn append(&self, share: NewShare) -> Result<ShareId> {
        self.with_conn(move |conn| {
            let timestamp = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO shares (round_number, timestamp, hash, difficulty, valid, block_height,
                                     worker_id, submission_id, reject_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    share.round_number as i64,
                    timestamp,
                    share.hash,
                    share.difficulty,
                    share.valid,
                    share.block_height as i64,
                    share.worker_id,
                    share.submission_id,
                    share.reject_reason,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn count_stats(&self, round: Option<u64>) -> Result<ShareStats> {
        self.with_conn(move |conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN valid = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN valid = 0 THEN 1 ELSE 0 END), 0),
                        COUNT(DISTINCT worker_id)
                 FROM shares
                 WHERE ?1 IS NULL OR round_number = ?1",
                params![round.map(|r| r as i64)],
                |row| {
                    Ok(ShareStats {
                        total_shares: row.get::<_, i64>(0)? as u64,
                        valid_shares: row.get::<_, i64>(1)? as u64,
                        invalid_shares: row.get::<_, i64>(2)? as u64,
                        unique_workers: row.get::<_, i64>(3)? as u64,
                    })
                },
            )?;
            Ok(stats)
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Share>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM shares ORDER BY id DESC LIMIT ?1",
                SHARE_COLUMNS
            ))?;
            let shares = stmt
                .query_map(params![limit as i64], Self::row_to_share)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(shares)
        })
        .await
    }

    async fn contains_submission(
        &self,
        round: u64,
        worker_id: &str,
        submission_id: &str,
    ) -> Result<bool> {
        let worker_id = worker_id.to_string();
        let submission_id = submission_id.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM shares
                     WHERE round_number = ?1 AND worker_id = ?2 AND submission_id = ?3
                     LIMIT 1",
                    params![round as i64, worker_id, submission_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn difficulty_since(&self, since: i64) -> Result<WorkSummary> {
        self.with_conn(move |conn| {
            let summary = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(difficulty), 0.0)
                 FROM shares WHERE valid = 1 AND timestamp >= ?1",
                params![since],
                |row| {
                    Ok(WorkSummary {
                        valid_shares: row.get::<_, i64>(0)? as u64,
                        total_difficulty: row.get(1)?,
                    })
                },
            )?;
            Ok(summary)
        })
        .await
    }

    async fn save_round(&self, round: &Round) -> Result<()> {
        let round = round.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO rounds (key, round_number, target_difficulty, started_at_ms)
                 VALUES ('current', ?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     round_number = excluded.round_number,
                     target_difficulty = excluded.target_difficulty,
                     started_at_ms = excluded.started_at_ms",
                params![
                    round.round_number as i64,
                    round.target_difficulty,
                    round.started_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_round(&self) -> Result<Option<Round>> {
        self.with_conn(|conn| {
            let row: Option<(i64, f64, i64)> = conn
                .query_row(
                    "SELECT round_number, target_difficulty, started_at_ms
                     FROM rounds WHERE key = 'current'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            row.map(|(round_number, target_difficulty, started_at_ms)| {
                let started_at = DateTime::<Utc>::from_timestamp_millis(started_at_ms)
                    .ok_or_else(|| {
                        CoordinatorError::Storage(format!(
                            "corrupt round start time {}",
                            started_at_ms
                        ))
                    })?;
                Ok(Round {
                    round_number: round_number as u64,
                    target_difficulty,
                    started_at,
                })
            })
            .transpose()
        })
        .await
    }
}
