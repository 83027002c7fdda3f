use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronx_domain::{Job, JobRun, JobRunStatus, JobStats, JobStore};
use cronx_errors::{CronxError, CronxResult};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::RwLock;
use tracing::debug;

use super::memory::run_listing_order;

/// 每个任务保留的最近执行记录条数
const MAX_RUNS_PER_JOB: isize = 100;

/// 夺锁：键不存在（含已过期被 Redis 回收）或归调用者所有时写入并刷新 TTL。
/// 单脚本执行保证原子性。
const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current or current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', tonumber(ARGV[2]))
    return 1
end
return 0
"#;

/// 释放：比较持有者后删除，不允许两次往返
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// 续期：比较持有者后顺延 TTL
const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[2]))
end
return 0
"#;

/// Redis 存储
///
/// 键空间约定（前缀 `cronx:`）：
/// - `cronx:job:<name>`   任务 hash
/// - `cronx:jobs`         任务名集合
/// - `cronx:run:<id>`     执行记录 hash
/// - `cronx:runs:<name>`  按任务的执行记录 id 列表（截断到最近 100 条）
/// - `cronx:lock:<name>`  锁，值为 worker id，PX 毫秒级 TTL
pub struct RedisJobStore {
    url: String,
    conn: RwLock<Option<MultiplexedConnection>>,
    acquire_script: Script,
    release_script: Script,
    extend_script: Script,
}

impl RedisJobStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: RwLock::new(None),
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        }
    }

    async fn conn(&self) -> CronxResult<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| CronxError::storage_unavailable("Redis 存储尚未连接"))
    }

    fn job_key(name: &str) -> String {
        format!("cronx:job:{name}")
    }

    fn jobs_set_key() -> &'static str {
        "cronx:jobs"
    }

    fn run_key(id: &str) -> String {
        format!("cronx:run:{id}")
    }

    fn runs_key(job_name: &str) -> String {
        format!("cronx:runs:{job_name}")
    }

    fn lock_key(job_name: &str) -> String {
        format!("cronx:lock:{job_name}")
    }

    async fn fetch_runs(&self, job_name: &str) -> CronxResult<Vec<JobRun>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.lrange(Self::runs_key(job_name), 0, -1).await?;
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            let fields: HashMap<String, String> = conn.hgetall(Self::run_key(&id)).await?;
            if !fields.is_empty() {
                runs.push(run_from_fields(&fields)?);
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn connect(&self) -> CronxResult<()> {
        let mut guard = self.conn.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let client = Client::open(self.url.as_str())
            .map_err(|e| CronxError::storage_unavailable(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CronxError::storage_unavailable(e.to_string()))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        *guard = Some(conn);
        debug!("Redis 存储连接成功");
        Ok(())
    }

    async fn disconnect(&self) -> CronxResult<()> {
        *self.conn.write().await = None;
        Ok(())
    }

    async fn save_job(&self, job: &Job) -> CronxResult<()> {
        let mut conn = self.conn().await?;
        let key = Self::job_key(&job.name);
        let fields = job_to_fields(job)?;
        // 整体覆盖：先删再写，事务管道保证原子
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .hset_multiple(&key, &fields)
            .sadd(Self::jobs_set_key(), &job.name)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_job(&self, name: &str) -> CronxResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(Self::job_key(name)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(&fields).map(Some)
    }

    async fn list_jobs(&self) -> CronxResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let mut names: Vec<String> = conn.smembers(Self::jobs_set_key()).await?;
        names.sort();
        let mut jobs = Vec::with_capacity(names.len());
        for name in names {
            let fields: HashMap<String, String> = conn.hgetall(Self::job_key(&name)).await?;
            if !fields.is_empty() {
                jobs.push(job_from_fields(&fields)?);
            }
        }
        Ok(jobs)
    }

    async fn delete_job(&self, name: &str) -> CronxResult<bool> {
        let mut conn = self.conn().await?;
        let existed: bool = conn.sismember(Self::jobs_set_key(), name).await?;
        let ids: Vec<String> = conn.lrange(Self::runs_key(name), 0, -1).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &ids {
            pipe.del(Self::run_key(id));
        }
        pipe.del(Self::runs_key(name))
            .del(Self::job_key(name))
            .del(Self::lock_key(name))
            .srem(Self::jobs_set_key(), name);
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(existed)
    }

    async fn pause_job(&self, name: &str) -> CronxResult<bool> {
        let mut conn = self.conn().await?;
        let key = Self::job_key(name);
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Ok(false);
        }
        let updated_at = Utc::now().to_rfc3339();
        let _: () = conn
            .hset_multiple(&key, &[("is_paused", "1"), ("updated_at", updated_at.as_str())])
            .await?;
        Ok(true)
    }

    async fn resume_job(&self, name: &str) -> CronxResult<bool> {
        let mut conn = self.conn().await?;
        let key = Self::job_key(name);
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Ok(false);
        }
        let updated_at = Utc::now().to_rfc3339();
        let _: () = conn
            .hset_multiple(&key, &[("is_paused", "0"), ("updated_at", updated_at.as_str())])
            .await?;
        Ok(true)
    }

    async fn save_job_run(&self, run: &JobRun) -> CronxResult<()> {
        let mut conn = self.conn().await?;
        let key = Self::run_key(&run.id);
        let runs_key = Self::runs_key(&run.job_name);
        let fields = run_to_fields(run)?;
        // 同一 id 的状态迁移不得在列表里产生重复项
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .hset_multiple(&key, &fields)
            .lrem(&runs_key, 0, &run.id)
            .lpush(&runs_key, &run.id)
            .ltrim(&runs_key, 0, MAX_RUNS_PER_JOB - 1)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_job_run(&self, id: &str) -> CronxResult<Option<JobRun>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(Self::run_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        run_from_fields(&fields).map(Some)
    }

    async fn get_job_runs(
        &self,
        job_name: &str,
        limit: Option<usize>,
    ) -> CronxResult<Vec<JobRun>> {
        let mut runs = self.fetch_runs(job_name).await?;
        runs.sort_by(run_listing_order);
        if let Some(limit) = limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn get_job_stats(&self, job_name: Option<&str>) -> CronxResult<JobStats> {
        let runs = match job_name {
            Some(name) => self.fetch_runs(name).await?,
            None => {
                let mut conn = self.conn().await?;
                let names: Vec<String> = conn.smembers(Self::jobs_set_key()).await?;
                let mut all = Vec::new();
                for name in names {
                    all.extend(self.fetch_runs(&name).await?);
                }
                all
            }
        };
        let mut stats = JobStats::aggregate(&runs);
        if let Some(name) = job_name {
            if let Some(job) = self.get_job(name).await? {
                stats.last_run = job.last_run;
                stats.next_run = job.next_run;
            }
        }
        Ok(stats)
    }

    async fn acquire_lock(
        &self,
        job_name: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> CronxResult<bool> {
        let mut conn = self.conn().await?;
        let granted: i64 = self
            .acquire_script
            .key(Self::lock_key(job_name))
            .arg(worker_id)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(granted == 1)
    }

    async fn release_lock(&self, job_name: &str, worker_id: &str) -> CronxResult<bool> {
        let mut conn = self.conn().await?;
        let released: i64 = self
            .release_script
            .key(Self::lock_key(job_name))
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }

    async fn extend_lock(
        &self,
        job_name: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> CronxResult<bool> {
        let mut conn = self.conn().await?;
        let extended: i64 = self
            .extend_script
            .key(Self::lock_key(job_name))
            .arg(worker_id)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }
}

fn bool_field(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn parse_instant(value: &str) -> CronxResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CronxError::Serialization(format!("时间戳解析失败: {e}")))
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> CronxResult<&'a String> {
    fields
        .get(name)
        .ok_or_else(|| CronxError::Serialization(format!("hash 缺少字段: {name}")))
}

fn optional_instant(
    fields: &HashMap<String, String>,
    name: &str,
) -> CronxResult<Option<DateTime<Utc>>> {
    fields.get(name).map(|s| parse_instant(s)).transpose()
}

fn job_to_fields(job: &Job) -> CronxResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("name", job.name.clone()),
        ("schedule", job.schedule.clone()),
        ("options", serde_json::to_string(&job.options)?),
        ("is_active", bool_field(job.is_active)),
        ("is_paused", bool_field(job.is_paused)),
        ("created_at", job.created_at.to_rfc3339()),
        ("updated_at", job.updated_at.to_rfc3339()),
    ];
    if let Some(t) = job.last_run {
        fields.push(("last_run", t.to_rfc3339()));
    }
    if let Some(t) = job.next_run {
        fields.push(("next_run", t.to_rfc3339()));
    }
    Ok(fields)
}

fn job_from_fields(fields: &HashMap<String, String>) -> CronxResult<Job> {
    Ok(Job {
        name: required(fields, "name")?.clone(),
        schedule: required(fields, "schedule")?.clone(),
        options: serde_json::from_str(required(fields, "options")?)?,
        is_active: required(fields, "is_active")? == "1",
        is_paused: required(fields, "is_paused")? == "1",
        created_at: parse_instant(required(fields, "created_at")?)?,
        updated_at: parse_instant(required(fields, "updated_at")?)?,
        last_run: optional_instant(fields, "last_run")?,
        next_run: optional_instant(fields, "next_run")?,
    })
}

fn run_to_fields(run: &JobRun) -> CronxResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", run.id.clone()),
        ("job_name", run.job_name.clone()),
        ("status", run.status.as_str().to_string()),
        ("attempt", run.attempt.to_string()),
    ];
    if let Some(t) = run.start_time {
        fields.push(("start_time", t.to_rfc3339()));
    }
    if let Some(t) = run.end_time {
        fields.push(("end_time", t.to_rfc3339()));
    }
    if let Some(error) = &run.error {
        fields.push(("error", error.clone()));
    }
    if let Some(result) = &run.result {
        fields.push(("result", serde_json::to_string(result)?));
    }
    Ok(fields)
}

fn run_from_fields(fields: &HashMap<String, String>) -> CronxResult<JobRun> {
    let status_text = required(fields, "status")?;
    let status = JobRunStatus::parse(status_text)
        .ok_or_else(|| CronxError::Serialization(format!("未知的执行状态: {status_text}")))?;
    let attempt: u32 = required(fields, "attempt")?
        .parse()
        .map_err(|e| CronxError::Serialization(format!("attempt 解析失败: {e}")))?;
    let result = fields
        .get("result")
        .map(|s| serde_json::from_str(s))
        .transpose()?;
    Ok(JobRun {
        id: required(fields, "id")?.clone(),
        job_name: required(fields, "job_name")?.clone(),
        status,
        start_time: optional_instant(fields, "start_time")?,
        end_time: optional_instant(fields, "end_time")?,
        error: fields.get("error").cloned(),
        result,
        attempt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronx_domain::JobOptions;

    #[test]
    fn test_job_hash_round_trip() {
        let mut job = Job::new("j", "*/5 * * * * *", JobOptions::default());
        job.last_run = Some(Utc::now());
        let fields: HashMap<String, String> = job_to_fields(&job)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let back = job_from_fields(&fields).unwrap();
        assert_eq!(back.name, job.name);
        assert_eq!(back.schedule, job.schedule);
        assert_eq!(back.options, job.options);
        assert_eq!(back.last_run.unwrap().timestamp(), job.last_run.unwrap().timestamp());
        assert!(back.next_run.is_none());
    }

    #[test]
    fn test_run_hash_round_trip() {
        let mut run = JobRun::new("j", 3);
        run.mark_running();
        run.mark_failed("boom");
        let fields: HashMap<String, String> = run_to_fields(&run)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let back = run_from_fields(&fields).unwrap();
        assert_eq!(back.id, run.id);
        assert_eq!(back.status, JobRunStatus::Failed);
        assert_eq!(back.attempt, 3);
        assert_eq!(back.error.as_deref(), Some("boom"));
    }
}
