use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::{debug, info};

use super::schema::{NewShare, Round, Share, ShareId, ShareStats, WorkSummary};
use super::ShareLedger;
use crate::error::{CoordinatorError, Result};

// Each script runs atomically on the server, which gives append its
// all-or-nothing row commit and the scans their consistent snapshot.

const APPEND_SCRIPT: &str = r#"
local id = redis.call('INCR', KEYS[1])
local key = ARGV[1] .. ':share:' .. id
redis.call('HSET', key, 'body', ARGV[2], 'ts', ARGV[3], 'valid', ARGV[4],
           'worker', ARGV[5], 'round', ARGV[6], 'difficulty', ARGV[7])
redis.call('ZADD', KEYS[2], id, id)
redis.call('ZADD', KEYS[3], ARGV[3], id)
redis.call('SADD', KEYS[4], ARGV[8])
return id
"#;

const STATS_SCRIPT: &str = r#"
local ids = redis.call('ZRANGE', KEYS[1], 0, -1)
local total, valid, invalid, unique = 0, 0, 0, 0
local workers = {}
for _, id in ipairs(ids) do
  local f = redis.call('HMGET', ARGV[1] .. ':share:' .. id, 'valid', 'worker', 'round')
  if ARGV[2] == '' or f[3] == ARGV[2] then
    total = total + 1
    if f[1] == '1' then valid = valid + 1 else invalid = invalid + 1 end
    if not workers[f[2]] then
      workers[f[2]] = true
      unique = unique + 1
    end
  end
end
return {total, valid, invalid, unique}
"#;

const RECENT_SCRIPT: &str = r#"
local ids = redis.call('ZREVRANGE', KEYS[1], 0, tonumber(ARGV[2]) - 1)
local out = {}
for _, id in ipairs(ids) do
  local f = redis.call('HMGET', ARGV[1] .. ':share:' .. id, 'body', 'ts')
  table.insert(out, {tonumber(id), f[1], tonumber(f[2])})
end
return out
"#;

const WORK_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[2], '+inf')
local count, sum = 0, 0
for _, id in ipairs(ids) do
  local f = redis.call('HMGET', ARGV[1] .. ':share:' .. id, 'valid', 'difficulty')
  if f[1] == '1' then
    count = count + 1
    sum = sum + tonumber(f[2])
  end
end
return {count, tostring(sum)}
"#;

/// Redis-backed ledger. Every call is bounded by the configured storage timeout.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl RedisStore {
    pub async fn new(redis_url: &str, timeout: Duration) -> Result<Self> {
        Self::with_prefix(redis_url, "coordinator", timeout).await
    }

    /// Keys are namespaced under `prefix`, so several ledgers can share one server.
    pub async fn with_prefix(redis_url: &str, prefix: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(CoordinatorError::StorageTimeout(timeout)),
        };

        info!("Share ledger connected to Redis under prefix {}", prefix);
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            timeout,
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    fn submission_member(worker_id: &str, submission_id: &str) -> Result<String> {
        Ok(serde_json::to_string(&(worker_id, submission_id))?)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CoordinatorError::StorageTimeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ShareLedger for RedisStore {
    async fn append(&self, share: NewShare) -> Result<ShareId> {
        let mut conn = self.conn.clone();
        let timestamp = Utc::now().timestamp();
        let member = Self::submission_member(&share.worker_id, &share.submission_id)?;
        let body = serde_json::to_string(&share)?;

        let script = Script::new(APPEND_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.key("shares:next_id"))
            .key(self.key("shares:index"))
            .key(self.key("shares:by_time"))
            .key(self.key(&format!("submissions:{}", share.round_number)))
            .arg(&self.prefix)
            .arg(body)
            .arg(timestamp)
            .arg(if share.valid { 1 } else { 0 })
            .arg(&share.worker_id)
            .arg(share.round_number)
            .arg(share.difficulty)
            .arg(member);

        let id: ShareId = self.bounded(invocation.invoke_async(&mut conn)).await?;
        debug!("Appended share {} for round {}", id, share.round_number);
        Ok(id)
    }

    async fn count_stats(&self, round: Option<u64>) -> Result<ShareStats> {
        let mut conn = self.conn.clone();
        let filter = round.map(|r| r.to_string()).unwrap_or_default();

        let script = Script::new(STATS_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.key("shares:index"))
            .arg(&self.prefix)
            .arg(filter);

        let (total_shares, valid_shares, invalid_shares, unique_workers): (u64, u64, u64, u64) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;

        Ok(ShareStats {
            total_shares,
            valid_shares,
            invalid_shares,
            unique_workers,
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Share>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();

        let script = Script::new(RECENT_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.key("shares:index"))
            .arg(&self.prefix)
            .arg(limit);

        let rows: Vec<(ShareId, String, i64)> =
            self.bounded(invocation.invoke_async(&mut conn)).await?;

        rows.into_iter()
            .map(|(id, body, timestamp)| {
                let share: NewShare = serde_json::from_str(&body)?;
                Ok(share.into_share(id, timestamp))
            })
            .collect()
    }

    async fn contains_submission(
        &self,
        round: u64,
        worker_id: &str,
        submission_id: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("submissions:{}", round));
        let member = Self::submission_member(worker_id, submission_id)?;
        self.bounded(conn.sismember(key, member)).await
    }

    async fn difficulty_since(&self, since: i64) -> Result<WorkSummary> {
        let mut conn = self.conn.clone();

        let script = Script::new(WORK_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.key("shares:by_time"))
            .arg(&self.prefix)
            .arg(since);

        let (valid_shares, total): (u64, String) =
            self.bounded(invocation.invoke_async(&mut conn)).await?;
        let total_difficulty = total.parse::<f64>().map_err(|e| {
            CoordinatorError::Storage(format!("bad difficulty sum {}: {}", total, e))
        })?;

        Ok(WorkSummary {
            valid_shares,
            total_difficulty,
        })
    }

    async fn save_round(&self, round: &Round) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(round)?;
        self.bounded(conn.set::<_, _, ()>(self.key("round:current"), json))
            .await
    }

    async fn load_round(&self) -> Result<Option<Round>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = self.bounded(conn.get(self.key("round:current"))).await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
