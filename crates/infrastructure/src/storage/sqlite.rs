use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cronx_domain::{Job, JobOptions, JobRun, JobRunStatus, JobStats, JobStore};
use cronx_errors::{CronxError, CronxResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::debug;

/// 内嵌 SQLite 存储
///
/// `connect` 负责创建连接池并幂等地建表；启用外键约束（级联删除执行记录）
/// 和 WAL 模式。时间戳以 UTC 写入，`options`/`result` 存 JSON 文本。
pub struct SqliteJobStore {
    url: String,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteJobStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> CronxResult<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| CronxError::storage_unavailable("SQLite 存储尚未连接"))
    }

    async fn run_migrations(pool: &SqlitePool) -> CronxResult<()> {
        debug!("初始化 SQLite 表结构");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                name TEXT PRIMARY KEY,
                schedule TEXT NOT NULL,
                options TEXT NOT NULL DEFAULT '{}',
                is_active INTEGER NOT NULL DEFAULT 1,
                is_paused INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                last_run DATETIME,
                next_run DATETIME
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_runs (
                id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL REFERENCES jobs(name) ON DELETE CASCADE,
                status TEXT NOT NULL,
                start_time DATETIME,
                end_time DATETIME,
                error TEXT,
                result TEXT,
                attempt INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                job_name TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                expires_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_runs_job_name ON job_runs(job_name)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_runs_start_time ON job_runs(start_time)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_locks_expires_at ON locks(expires_at)")
            .execute(pool)
            .await?;

        Ok(())
    }

    fn row_to_job(row: &SqliteRow) -> CronxResult<Job> {
        let options_json: String = row.try_get("options")?;
        let options: JobOptions = serde_json::from_str(&options_json)?;
        Ok(Job {
            name: row.try_get("name")?,
            schedule: row.try_get("schedule")?,
            options,
            is_active: row.try_get("is_active")?,
            is_paused: row.try_get("is_paused")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_run: row.try_get("last_run")?,
            next_run: row.try_get("next_run")?,
        })
    }

    fn row_to_run(row: &SqliteRow) -> CronxResult<JobRun> {
        let status_text: String = row.try_get("status")?;
        let status = JobRunStatus::parse(&status_text).ok_or_else(|| {
            CronxError::Serialization(format!("未知的执行状态: {status_text}"))
        })?;
        let result_json: Option<String> = row.try_get("result")?;
        let result = match result_json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        let attempt: i64 = row.try_get("attempt")?;
        Ok(JobRun {
            id: row.try_get("id")?,
            job_name: row.try_get("job_name")?,
            status,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            error: row.try_get("error")?,
            result,
            attempt: attempt as u32,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn connect(&self) -> CronxResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let options = SqliteConnectOptions::from_str(&self.url)
            .map_err(|e| CronxError::storage_unavailable(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CronxError::storage_unavailable(e.to_string()))?;

        Self::run_migrations(&pool).await?;
        *guard = Some(pool);
        debug!(url = %self.url, "SQLite 存储连接成功");
        Ok(())
    }

    async fn disconnect(&self) -> CronxResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn save_job(&self, job: &Job) -> CronxResult<()> {
        let pool = self.pool().await?;
        let options_json = serde_json::to_string(&job.options)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (name, schedule, options, is_active, is_paused,
                              created_at, updated_at, last_run, next_run)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(name) DO UPDATE SET
                schedule = excluded.schedule,
                options = excluded.options,
                is_active = excluded.is_active,
                is_paused = excluded.is_paused,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                last_run = excluded.last_run,
                next_run = excluded.next_run
            "#,
        )
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(options_json)
        .bind(job.is_active)
        .bind(job.is_paused)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.last_run)
        .bind(job.next_run)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, name: &str) -> CronxResult<Option<Job>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM jobs WHERE name = ?1")
            .bind(name)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_jobs(&self) -> CronxResult<Vec<Job>> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY name")
            .fetch_all(&pool)
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn delete_job(&self, name: &str) -> CronxResult<bool> {
        let pool = self.pool().await?;
        // job_runs 由外键级联删除
        let result = sqlx::query("DELETE FROM jobs WHERE name = ?1")
            .bind(name)
            .execute(&pool)
            .await?;
        sqlx::query("DELETE FROM locks WHERE job_name = ?1")
            .bind(name)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pause_job(&self, name: &str) -> CronxResult<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query("UPDATE jobs SET is_paused = 1, updated_at = ?1 WHERE name = ?2")
            .bind(Utc::now())
            .bind(name)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn resume_job(&self, name: &str) -> CronxResult<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query("UPDATE jobs SET is_paused = 0, updated_at = ?1 WHERE name = ?2")
            .bind(Utc::now())
            .bind(name)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_job_run(&self, run: &JobRun) -> CronxResult<()> {
        let pool = self.pool().await?;
        let result_json = run
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO job_runs (id, job_name, status, start_time, end_time, error, result, attempt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                error = excluded.error,
                result = excluded.result,
                attempt = excluded.attempt
            "#,
        )
        .bind(&run.id)
        .bind(&run.job_name)
        .bind(run.status.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(&run.error)
        .bind(result_json)
        .bind(run.attempt as i64)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_job_run(&self, id: &str) -> CronxResult<Option<JobRun>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM job_runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn get_job_runs(
        &self,
        job_name: &str,
        limit: Option<usize>,
    ) -> CronxResult<Vec<JobRun>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM job_runs WHERE job_name = ?1
            ORDER BY start_time IS NULL, start_time DESC, attempt DESC
            LIMIT ?2
            "#,
        )
        .bind(job_name)
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&pool)
        .await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn get_job_stats(&self, job_name: Option<&str>) -> CronxResult<JobStats> {
        let pool = self.pool().await?;
        let query = match job_name {
            Some(_) => {
                r#"
                SELECT COUNT(*) AS total,
                       COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS successes,
                       COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failures,
                       AVG((julianday(end_time) - julianday(start_time)) * 86400000.0) AS avg_ms
                FROM job_runs WHERE job_name = ?1
                "#
            }
            None => {
                r#"
                SELECT COUNT(*) AS total,
                       COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS successes,
                       COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failures,
                       AVG((julianday(end_time) - julianday(start_time)) * 86400000.0) AS avg_ms
                FROM job_runs
                "#
            }
        };
        let mut q = sqlx::query(query);
        if let Some(name) = job_name {
            q = q.bind(name);
        }
        let row = q.fetch_one(&pool).await?;

        let total: i64 = row.try_get("total")?;
        let successes: i64 = row.try_get("successes")?;
        let failures: i64 = row.try_get("failures")?;
        let avg_ms: Option<f64> = row.try_get("avg_ms")?;
        let mut stats = JobStats {
            total_runs: total as u64,
            successful_runs: successes as u64,
            failed_runs: failures as u64,
            average_duration_ms: avg_ms.unwrap_or(0.0),
            last_run: None,
            next_run: None,
        };

        if let Some(name) = job_name {
            let job_row = sqlx::query("SELECT last_run, next_run FROM jobs WHERE name = ?1")
                .bind(name)
                .fetch_optional(&pool)
                .await?;
            if let Some(job_row) = job_row {
                stats.last_run = job_row.try_get("last_run")?;
                stats.next_run = job_row.try_get("next_run")?;
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
        let pool = self.pool().await?;
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);
        // 单条语句完成条件性夺锁：不存在 / 已过期 / 本来就是自己的
        let result = sqlx::query(
            r#"
            INSERT INTO locks (job_name, worker_id, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(job_name) DO UPDATE SET
                worker_id = excluded.worker_id,
                expires_at = excluded.expires_at
            WHERE locks.worker_id = excluded.worker_id OR locks.expires_at <= ?4
            "#,
        )
        .bind(job_name)
        .bind(worker_id)
        .bind(expires_at)
        .bind(now)
        .execute(&pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, job_name: &str, worker_id: &str) -> CronxResult<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM locks WHERE job_name = ?1 AND worker_id = ?2")
            .bind(job_name)
            .bind(worker_id)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend_lock(
        &self,
        job_name: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> CronxResult<bool> {
        let pool = self.pool().await?;
        let expires_at = Utc::now() + chrono::Duration::milliseconds(ttl.as_millis() as i64);
        let result =
            sqlx::query("UPDATE locks SET expires_at = ?1 WHERE job_name = ?2 AND worker_id = ?3")
                .bind(expires_at)
                .bind(job_name)
                .bind(worker_id)
                .execute(&pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
