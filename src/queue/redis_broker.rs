//! Redis-backed broker.
//!
//! Layout under `{prefix}`:
//! - `job:{id}`: hash with every [`JobRecord`] field, times in epoch millis
//! - `q:{queue}:waiting`: zset scored `-priority`, member `{seq:020}:{id}`,
//!   so equal priorities fall back to lexicographic seq order (FIFO)
//! - `q:{queue}:delayed`: zset scored by `scheduled_at`
//! - `q:{queue}:active`: zset scored by the last heartbeat (the lease)
//! - `q:{queue}:completed`, `q:{queue}:failed`: zsets scored by `processed_at`
//! - `q:{queue}:signal`: one-element list popped by idle workers (BLPOP)
//! - `paused`: set of paused queue names, `seq`: creation counter
//!
//! Every state change runs as one Lua script, so a claim is atomic across
//! any number of worker processes.

use {
    super::{QueueBackend, QueueError, STALL_ERROR, StallReport, terminal_only},
    crate::domain::{
        error::JobError,
        job::{
            JobKind, JobOptions, JobRecord, JobResult, JobStatus, NewJob, QueueCounts, QueueName,
        },
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    redis::{
        Client, Script,
        aio::{ConnectionManager, MultiplexedConnection},
    },
    std::{collections::HashMap, str::FromStr, time::Duration},
    tokio::sync::Mutex,
    uuid::Uuid,
};

pub const DEFAULT_PREFIX: &str = "shop_sync";
/// Delayed jobs promoted per dequeue call.
const PROMOTE_BATCH: i64 = 100;

const ENQUEUE: &str = r#"
local seq = redis.call('INCR', KEYS[4])
local key = ARGV[1] .. ':job:' .. ARGV[2]
redis.call('HSET', key,
    'id', ARGV[2], 'queue', ARGV[3], 'kind', ARGV[4], 'payload', ARGV[5],
    'status', 'pending', 'attempts', 0, 'max_attempts', ARGV[7],
    'priority', ARGV[6], 'progress', 0, 'stalled_count', 0, 'seq', seq,
    'scheduled_at', ARGV[8], 'created_at', ARGV[9], 'updated_at', ARGV[9])
if tonumber(ARGV[8]) > tonumber(ARGV[9]) then
    redis.call('ZADD', KEYS[2], ARGV[8], ARGV[2])
else
    redis.call('ZADD', KEYS[1], -tonumber(ARGV[6]), string.format('%020d:%s', seq, ARGV[2]))
    redis.call('LPUSH', KEYS[3], '1')
    redis.call('LTRIM', KEYS[3], 0, 0)
end
return seq
"#;

const DEQUEUE: &str = r#"
if redis.call('SISMEMBER', KEYS[4], ARGV[2]) == 1 then
    return false
end
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[3], 'LIMIT', 0, ARGV[4])
for _, id in ipairs(due) do
    local f = redis.call('HMGET', ARGV[1] .. ':job:' .. id, 'priority', 'seq')
    redis.call('ZREM', KEYS[2], id)
    if f[1] then
        redis.call('ZADD', KEYS[1], -tonumber(f[1]), string.format('%020d:%s', tonumber(f[2]), id))
    end
end
local head = redis.call('ZRANGE', KEYS[1], 0, 0)
if #head == 0 then
    return false
end
redis.call('ZREM', KEYS[1], head[1])
local id = string.sub(head[1], 22)
local key = ARGV[1] .. ':job:' .. id
redis.call('HSET', key, 'status', 'active', 'progress', 0,
    'heartbeat_at', ARGV[3], 'updated_at', ARGV[3])
redis.call('HINCRBY', key, 'attempts', 1)
redis.call('ZADD', KEYS[3], ARGV[3], id)
return redis.call('HGETALL', key)
"#;

const TOUCH: &str = r#"
local key = ARGV[1] .. ':job:' .. ARGV[2]
local status = redis.call('HGET', key, 'status')
if not status then
    return 'missing'
end
if status ~= 'active' then
    return status
end
redis.call('HSET', key, 'heartbeat_at', ARGV[3], 'updated_at', ARGV[3])
if ARGV[4] ~= '' then
    redis.call('HSET', key, 'progress', ARGV[4])
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[2])
return 'ok'
"#;

const COMPLETE: &str = r#"
local key = ARGV[1] .. ':job:' .. ARGV[2]
local status = redis.call('HGET', key, 'status')
if not status then
    return 'missing'
end
if status ~= 'active' then
    return status
end
redis.call('HSET', key, 'status', 'completed', 'progress', 100, 'result', ARGV[4],
    'processed_at', ARGV[3], 'updated_at', ARGV[3])
redis.call('HDEL', key, 'heartbeat_at')
redis.call('ZREM', KEYS[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 'ok'
"#;

const FAIL: &str = r#"
local key = ARGV[1] .. ':job:' .. ARGV[2]
local status = redis.call('HGET', key, 'status')
if not status then
    return 'missing'
end
if status ~= 'active' then
    return status
end
redis.call('HSET', key, 'error_message', ARGV[4], 'updated_at', ARGV[3])
redis.call('HDEL', key, 'heartbeat_at')
redis.call('ZREM', KEYS[1], ARGV[2])
local f = redis.call('HMGET', key, 'attempts', 'max_attempts')
if ARGV[5] ~= '' and tonumber(f[1]) < tonumber(f[2]) then
    redis.call('HSET', key, 'status', 'pending', 'scheduled_at', ARGV[5])
    redis.call('ZADD', KEYS[3], ARGV[5], ARGV[2])
    redis.call('LPUSH', KEYS[4], '1')
    redis.call('LTRIM', KEYS[4], 0, 0)
else
    redis.call('HSET', key, 'status', 'failed', 'processed_at', ARGV[3])
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
end
return 'ok'
"#;

const CLEAN: &str = r#"
local limit = tonumber(ARGV[3])
local victims = {}
for _, zkey in ipairs(KEYS) do
    local rows = redis.call('ZRANGEBYSCORE', zkey, '-inf', ARGV[2], 'WITHSCORES', 'LIMIT', 0, limit)
    for i = 1, #rows, 2 do
        table.insert(victims, { tonumber(rows[i + 1]), rows[i], zkey })
    end
end
table.sort(victims, function(a, b) return a[1] < b[1] end)
local removed = 0
for i = 1, math.min(limit, #victims) do
    local v = victims[i]
    redis.call('ZREM', v[3], v[2])
    redis.call('DEL', ARGV[1] .. ':job:' .. v[2])
    removed = removed + 1
end
return removed
"#;

const RECOVER: &str = r#"
local stale = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[3])
local out = {}
for _, id in ipairs(stale) do
    local key = ARGV[1] .. ':job:' .. id
    redis.call('ZREM', KEYS[1], id)
    if redis.call('EXISTS', key) == 1 then
        local count = redis.call('HINCRBY', key, 'stalled_count', 1)
        redis.call('HDEL', key, 'heartbeat_at')
        redis.call('HSET', key, 'updated_at', ARGV[2])
        if count > tonumber(ARGV[4]) then
            redis.call('HSET', key, 'status', 'failed', 'error_message', ARGV[5],
                'processed_at', ARGV[2])
            redis.call('ZADD', KEYS[3], ARGV[2], id)
            table.insert(out, 'failed:' .. id)
        else
            local f = redis.call('HMGET', key, 'attempts', 'priority', 'seq')
            local attempts = math.max(tonumber(f[1]) - 1, 0)
            redis.call('HSET', key, 'status', 'pending', 'attempts', attempts,
                'scheduled_at', ARGV[2])
            redis.call('ZADD', KEYS[2], -tonumber(f[2]), string.format('%020d:%s', tonumber(f[3]), id))
            table.insert(out, 'requeued:' .. id)
        end
    end
end
if #out > 0 then
    redis.call('LPUSH', KEYS[4], '1')
    redis.call('LTRIM', KEYS[4], 0, 0)
end
return out
"#;

/// Key names for one prefix.
#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn queue(&self, queue: QueueName, part: &str) -> String {
        format!("{}:q:{}:{part}", self.prefix, queue.as_str())
    }

    fn waiting(&self, queue: QueueName) -> String {
        self.queue(queue, "waiting")
    }

    fn delayed(&self, queue: QueueName) -> String {
        self.queue(queue, "delayed")
    }

    fn active(&self, queue: QueueName) -> String {
        self.queue(queue, "active")
    }

    fn terminal(&self, queue: QueueName, status: JobStatus) -> String {
        self.queue(queue, status.as_str())
    }

    fn signal(&self, queue: QueueName) -> String {
        self.queue(queue, "signal")
    }

    fn paused(&self) -> String {
        format!("{}:paused", self.prefix)
    }

    fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    fn job(&self, id: Uuid) -> String {
        format!("{}:job:{id}", self.prefix)
    }
}

struct Scripts {
    enqueue: Script,
    dequeue: Script,
    touch: Script,
    complete: Script,
    fail: Script,
    clean: Script,
    recover: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE),
            dequeue: Script::new(DEQUEUE),
            touch: Script::new(TOUCH),
            complete: Script::new(COMPLETE),
            fail: Script::new(FAIL),
            clean: Script::new(CLEAN),
            recover: Script::new(RECOVER),
        }
    }
}

/// Broker backend on a shared Redis. Jobs, leases and stall counters live
/// in Redis, so a restart of any worker process loses nothing and a stalled
/// job held by a dead process is recovered by any surviving one.
pub struct RedisQueue {
    client: Client,
    conn: ConnectionManager,
    keys: Keys,
    scripts: Scripts,
    /// BLPOP blocks its connection, so idle waits get their own per queue.
    blocking: HashMap<QueueName, Mutex<Option<MultiplexedConnection>>>,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        Self::connect_with_prefix(url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            keys: Keys {
                prefix: prefix.to_string(),
            },
            scripts: Scripts::new(),
            blocking: QueueName::ALL
                .into_iter()
                .map(|q| (q, Mutex::new(None)))
                .collect(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.keys.prefix
    }

    async fn touch(&self, id: Uuid, progress: Option<i32>) -> Result<(), QueueError> {
        let Some(job) = self.get(id).await? else {
            return Err(QueueError::NotFound(id));
        };
        let mut conn = self.conn.clone();
        let reply: String = self
            .scripts
            .touch
            .key(self.keys.active(job.queue))
            .arg(&self.keys.prefix)
            .arg(id.to_string())
            .arg(Utc::now().timestamp_millis())
            .arg(progress.map(|p| p.clamp(0, 100).to_string()).unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;
        transition(id, JobStatus::Active, &reply)
    }

    /// Ids held in one of the queue's zsets, at most `limit` of them.
    async fn ids_in(&self, key: &str, limit: usize) -> Result<Vec<Uuid>, QueueError> {
        let mut conn = self.conn.clone();
        let stop = limit.saturating_sub(1) as isize;
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(members
            .iter()
            .filter_map(|m| member_id(m))
            .collect())
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> Result<Vec<JobRecord>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGETALL").arg(self.keys.job(*id));
        }
        let mut conn = self.conn.clone();
        let maps: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
        ids.iter()
            .zip(maps)
            .filter(|(_, map)| !map.is_empty())
            .map(|(id, map)| decode(*id, map))
            .collect()
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobRecord, QueueError> {
        let new = NewJob::build(queue, kind, payload, &options, Utc::now())
            .map_err(|e| QueueError::InvalidJob(e.to_string()))?;
        let body = serde_json::to_string(&new.payload)?;

        let mut conn = self.conn.clone();
        let seq: i64 = self
            .scripts
            .enqueue
            .key(self.keys.waiting(queue))
            .key(self.keys.delayed(queue))
            .key(self.keys.signal(queue))
            .key(self.keys.seq())
            .arg(&self.keys.prefix)
            .arg(new.id.to_string())
            .arg(queue.as_str())
            .arg(kind.as_str())
            .arg(body)
            .arg(new.priority)
            .arg(new.max_attempts)
            .arg(new.scheduled_at.timestamp_millis())
            .arg(new.created_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(JobRecord::from_new(new, seq))
    }

    async fn dequeue_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let claimed: Option<HashMap<String, String>> = self
            .scripts
            .dequeue
            .key(self.keys.waiting(queue))
            .key(self.keys.delayed(queue))
            .key(self.keys.active(queue))
            .key(self.keys.paused())
            .arg(&self.keys.prefix)
            .arg(queue.as_str())
            .arg(now.timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        let Some(map) = claimed else {
            return Ok(None);
        };
        let id = map
            .get("id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| QueueError::Corrupt {
                id: Uuid::nil(),
                reason: "claimed job hash has no id".into(),
            })?;
        decode(id, map).map(Some)
    }

    async fn mark_active(&self, id: Uuid) -> Result<(), QueueError> {
        self.touch(id, None).await
    }

    async fn heartbeat(&self, id: Uuid) -> Result<(), QueueError> {
        self.touch(id, None).await
    }

    async fn report_progress(&self, id: Uuid, percent: i32) -> Result<(), QueueError> {
        self.touch(id, Some(percent)).await
    }

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<(), QueueError> {
        let Some(job) = self.get(id).await? else {
            return Err(QueueError::NotFound(id));
        };
        let body = serde_json::to_string(result)?;
        let mut conn = self.conn.clone();
        let reply: String = self
            .scripts
            .complete
            .key(self.keys.active(job.queue))
            .key(self.keys.terminal(job.queue, JobStatus::Completed))
            .arg(&self.keys.prefix)
            .arg(id.to_string())
            .arg(Utc::now().timestamp_millis())
            .arg(body)
            .invoke_async(&mut conn)
            .await?;
        transition(id, JobStatus::Completed, &reply)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let Some(job) = self.get(id).await? else {
            return Err(QueueError::NotFound(id));
        };
        let mut conn = self.conn.clone();
        let reply: String = self
            .scripts
            .fail
            .key(self.keys.active(job.queue))
            .key(self.keys.terminal(job.queue, JobStatus::Failed))
            .key(self.keys.delayed(job.queue))
            .key(self.keys.signal(job.queue))
            .arg(&self.keys.prefix)
            .arg(id.to_string())
            .arg(Utc::now().timestamp_millis())
            .arg(error.to_string())
            .arg(retry_at.map(|at| at.timestamp_millis().to_string()).unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;
        transition(id, JobStatus::Failed, &reply)
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job(id))
            .query_async(&mut conn)
            .await?;
        if map.is_empty() {
            return Ok(None);
        }
        decode(id, map).map(Some)
    }

    async fn list_by_status(
        &self,
        queue: QueueName,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sets = match status {
            JobStatus::Pending => vec![self.keys.waiting(queue), self.keys.delayed(queue)],
            JobStatus::Active => vec![self.keys.active(queue)],
            terminal => vec![self.keys.terminal(queue, terminal)],
        };
        let mut ids = Vec::new();
        for key in &sets {
            ids.extend(self.ids_in(key, limit).await?);
        }

        let mut jobs: Vec<JobRecord> = self
            .fetch_many(&ids)
            .await?
            .into_iter()
            .filter(|j| j.status == status)
            .collect();
        jobs.sort_by_key(|j| j.seq);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn count_by_status(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<QueueCounts, QueueError> {
        let now_ms = now.timestamp_millis();
        let mut conn = self.conn.clone();
        let (ready, due, delayed, active, completed, failed, paused): (
            u64,
            u64,
            u64,
            u64,
            u64,
            u64,
            bool,
        ) = redis::pipe()
            .cmd("ZCARD")
            .arg(self.keys.waiting(queue))
            .cmd("ZCOUNT")
            .arg(self.keys.delayed(queue))
            .arg("-inf")
            .arg(now_ms)
            .cmd("ZCOUNT")
            .arg(self.keys.delayed(queue))
            .arg(format!("({now_ms}"))
            .arg("+inf")
            .cmd("ZCARD")
            .arg(self.keys.active(queue))
            .cmd("ZCARD")
            .arg(self.keys.terminal(queue, JobStatus::Completed))
            .cmd("ZCARD")
            .arg(self.keys.terminal(queue, JobStatus::Failed))
            .cmd("SISMEMBER")
            .arg(self.keys.paused())
            .arg(queue.as_str())
            .query_async(&mut conn)
            .await?;

        let mut counts = QueueCounts::new(ready + due, active, completed, failed, delayed);
        counts.paused = paused;
        Ok(counts)
    }

    async fn clean(
        &self,
        queue: QueueName,
        older_than: Duration,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<u64, QueueError> {
        let statuses = terminal_only(statuses);
        if statuses.is_empty() || limit == 0 {
            return Ok(0);
        }
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|_| QueueError::InvalidJob(format!("retention out of range: {older_than:?}")))?;
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN);

        let mut invocation = self.scripts.clean.prepare_invoke();
        for status in &statuses {
            invocation.key(self.keys.terminal(queue, *status));
        }
        let mut conn = self.conn.clone();
        let removed: u64 = invocation
            .arg(&self.keys.prefix)
            .arg(cutoff)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn pause(&self, queue: QueueName) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(self.keys.paused())
            .arg(queue.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn resume(&self, queue: QueueName) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: (i64, i64) = redis::pipe()
            .cmd("SREM")
            .arg(self.keys.paused())
            .arg(queue.as_str())
            .cmd("LPUSH")
            .arg(self.keys.signal(queue))
            .arg("1")
            .cmd("LTRIM")
            .arg(self.keys.signal(queue))
            .arg(0)
            .arg(0)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_paused(&self, queue: QueueName) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let paused: bool = redis::cmd("SISMEMBER")
            .arg(self.keys.paused())
            .arg(queue.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(paused)
    }

    async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        stall_interval: Duration,
        max_stalled_count: i32,
    ) -> Result<StallReport, QueueError> {
        let stall = chrono::Duration::from_std(stall_interval)
            .map_err(|_| QueueError::InvalidJob(format!("stall interval out of range: {stall_interval:?}")))?;
        let lease_cutoff = now
            .checked_sub_signed(stall)
            .map(|t| t.timestamp_millis())
            .unwrap_or(i64::MIN);

        let mut report = StallReport::default();
        let mut conn = self.conn.clone();
        for queue in QueueName::ALL {
            let touched: Vec<String> = self
                .scripts
                .recover
                .key(self.keys.active(queue))
                .key(self.keys.waiting(queue))
                .key(self.keys.terminal(queue, JobStatus::Failed))
                .key(self.keys.signal(queue))
                .arg(&self.keys.prefix)
                .arg(now.timestamp_millis())
                .arg(lease_cutoff)
                .arg(max_stalled_count)
                .arg(STALL_ERROR)
                .invoke_async(&mut conn)
                .await?;

            for entry in touched {
                match entry.split_once(':') {
                    Some(("failed", id)) => report.failed.extend(Uuid::parse_str(id).ok()),
                    Some(("requeued", id)) => report.requeued.extend(Uuid::parse_str(id).ok()),
                    _ => tracing::warn!(entry = %entry, "unexpected stall sweep reply"),
                }
            }
        }
        Ok(report)
    }

    async fn wait_for_work(&self, queue: QueueName, max_wait: Duration) {
        let Some(slot) = self.blocking.get(&queue) else {
            tokio::time::sleep(max_wait).await;
            return;
        };
        let mut slot = slot.lock().await;
        if slot.is_none() {
            match self.client.get_multiplexed_tokio_connection().await {
                Ok(conn) => *slot = Some(conn),
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "redis wait connection failed");
                    tokio::time::sleep(max_wait).await;
                    return;
                }
            }
        }
        let Some(conn) = slot.as_mut() else {
            return;
        };

        // BLPOP 0 would block forever.
        let timeout = max_wait.as_secs_f64().max(0.01);
        let popped: Result<Option<(String, String)>, redis::RedisError> = redis::cmd("BLPOP")
            .arg(self.keys.signal(queue))
            .arg(timeout)
            .query_async(conn)
            .await;
        if let Err(e) = popped {
            tracing::debug!(queue = %queue, error = %e, "redis wait failed, reconnecting");
            *slot = None;
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Map a script reply onto the transition error types.
fn transition(id: Uuid, to: JobStatus, reply: &str) -> Result<(), QueueError> {
    match reply {
        "ok" => Ok(()),
        "missing" => Err(QueueError::NotFound(id)),
        other => match JobStatus::try_from(other) {
            Ok(from) => Err(QueueError::InvalidTransition { id, from, to }),
            Err(_) => Err(QueueError::Corrupt {
                id,
                reason: format!("unexpected script reply {other:?}"),
            }),
        },
    }
}

/// `{seq:020}:{id}` in the waiting set, a bare id everywhere else.
fn member_id(member: &str) -> Option<Uuid> {
    let raw = member.split_once(':').map_or(member, |(_, id)| id);
    Uuid::parse_str(raw).ok()
}

struct Fields {
    id: Uuid,
    map: HashMap<String, String>,
}

impl Fields {
    fn corrupt(&self, reason: String) -> QueueError {
        QueueError::Corrupt { id: self.id, reason }
    }

    fn text(&mut self, name: &str) -> Result<String, QueueError> {
        self.map
            .remove(name)
            .ok_or_else(|| self.corrupt(format!("missing field {name}")))
    }

    fn number<T: FromStr>(&mut self, name: &str) -> Result<T, QueueError> {
        let raw = self.text(name)?;
        raw.parse()
            .map_err(|_| self.corrupt(format!("{name} is not a number: {raw:?}")))
    }

    fn opt_time(&mut self, name: &str) -> Result<Option<DateTime<Utc>>, QueueError> {
        if !self.map.contains_key(name) {
            return Ok(None);
        }
        let ms: i64 = self.number(name)?;
        DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| self.corrupt(format!("{name} out of range: {ms}")))
    }

    fn time(&mut self, name: &str) -> Result<DateTime<Utc>, QueueError> {
        self.opt_time(name)?
            .ok_or_else(|| self.corrupt(format!("missing field {name}")))
    }

    fn json(&mut self, name: &str) -> Result<Option<serde_json::Value>, QueueError> {
        match self.map.remove(name) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn decode(id: Uuid, map: HashMap<String, String>) -> Result<JobRecord, QueueError> {
    let mut f = Fields { id, map };
    let queue = f.text("queue")?;
    let queue = QueueName::try_from(queue.as_str()).map_err(|e| f.corrupt(e.to_string()))?;
    let kind = f.text("kind")?;
    let kind = JobKind::try_from(kind.as_str()).map_err(|e| f.corrupt(e.to_string()))?;
    let status = f.text("status")?;
    let status = JobStatus::try_from(status.as_str()).map_err(|e| f.corrupt(e.to_string()))?;

    Ok(JobRecord {
        id,
        queue,
        kind,
        payload: f.json("payload")?.unwrap_or(serde_json::Value::Null),
        status,
        attempts: f.number("attempts")?,
        max_attempts: f.number("max_attempts")?,
        priority: f.number("priority")?,
        progress: f.number("progress")?,
        result: f.json("result")?,
        error_message: f.map.remove("error_message"),
        stalled_count: f.number("stalled_count")?,
        seq: f.number("seq")?,
        scheduled_at: f.time("scheduled_at")?,
        heartbeat_at: f.opt_time("heartbeat_at")?,
        created_at: f.time("created_at")?,
        updated_at: f.time("updated_at")?,
        processed_at: f.opt_time("processed_at")?,
    })
}
