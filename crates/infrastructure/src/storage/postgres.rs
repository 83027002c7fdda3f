use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cronx_domain::{Job, JobOptions, JobRun, JobRunStatus, JobStats, JobStore};
use cronx_errors::{CronxError, CronxResult};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::debug;

/// PostgreSQL 存储
///
/// 与 SQLite 适配器满足同一份契约；差异在 JSONB 列、`NULLS LAST` 排序
/// 和连接池参数。夺锁同样是单条 `ON CONFLICT ... DO UPDATE ... WHERE`。
pub struct PostgresJobStore {
    url: String,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresJobStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> CronxResult<PgPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| CronxError::storage_unavailable("PostgreSQL 存储尚未连接"))
    }

    async fn run_migrations(pool: &PgPool) -> CronxResult<()> {
        debug!("初始化 PostgreSQL 表结构");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                name TEXT PRIMARY KEY,
                schedule TEXT NOT NULL,
                options JSONB NOT NULL DEFAULT '{}',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_paused BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_run TIMESTAMPTZ,
                next_run TIMESTAMPTZ
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
                start_time TIMESTAMPTZ,
                end_time TIMESTAMPTZ,
                error TEXT,
                result JSONB,
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
                expires_at TIMESTAMPTZ NOT NULL
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

    fn row_to_job(row: &PgRow) -> CronxResult<Job> {
        let options_value: serde_json::Value = row.try_get("options")?;
        let options: JobOptions = serde_json::from_value(options_value)?;
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

    fn row_to_run(row: &PgRow) -> CronxResult<JobRun> {
        let status_text: String = row.try_get("status")?;
        let status = JobRunStatus::parse(&status_text).ok_or_else(|| {
            CronxError::Serialization(format!("未知的执行状态: {status_text}"))
        })?;
        let attempt: i32 = row.try_get("attempt")?;
        Ok(JobRun {
            id: row.try_get("id")?,
            job_name: row.try_get("job_name")?,
            status,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            error: row.try_get("error")?,
            result: row.try_get("result")?,
            attempt: attempt as u32,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn connect(&self) -> CronxResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&self.url)
            .await
            .map_err(|e| CronxError::storage_unavailable(e.to_string()))?;

        Self::run_migrations(&pool).await?;
        *guard = Some(pool);
        debug!("PostgreSQL 存储连接成功");
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
        let options_value = serde_json::to_value(&job.options)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (name, schedule, options, is_active, is_paused,
                              created_at, updated_at, last_run, next_run)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO UPDATE SET
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
        .bind(options_value)
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
        let row = sqlx::query("SELECT * FROM jobs WHERE name = $1")
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
        let result = sqlx::query("DELETE FROM jobs WHERE name = $1")
            .bind(name)
            .execute(&pool)
            .await?;
        sqlx::query("DELETE FROM locks WHERE job_name = $1")
            .bind(name)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pause_job(&self, name: &str) -> CronxResult<bool> {
        let pool = self.pool().await?;
        let result =
            sqlx::query("UPDATE jobs SET is_paused = TRUE, updated_at = $1 WHERE name = $2")
                .bind(Utc::now())
                .bind(name)
                .execute(&pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn resume_job(&self, name: &str) -> CronxResult<bool> {
        let pool = self.pool().await?;
        let result =
            sqlx::query("UPDATE jobs SET is_paused = FALSE, updated_at = $1 WHERE name = $2")
                .bind(Utc::now())
                .bind(name)
                .execute(&pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_job_run(&self, run: &JobRun) -> CronxResult<()> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO job_runs (id, job_name, status, start_time, end_time, error, result, attempt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
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
        .bind(&run.result)
        .bind(run.attempt as i32)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_job_run(&self, id: &str) -> CronxResult<Option<JobRun>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM job_runs WHERE id = $1")
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
        let mut query = String::from(
            "SELECT * FROM job_runs WHERE job_name = $1 \
             ORDER BY start_time DESC NULLS LAST, attempt DESC",
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        let rows = sqlx::query(&query).bind(job_name).fetch_all(&pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn get_job_stats(&self, job_name: Option<&str>) -> CronxResult<JobStats> {
        let pool = self.pool().await?;
        let base = r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS successes,
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failures,
                   AVG(EXTRACT(EPOCH FROM (end_time - start_time)) * 1000.0)::float8 AS avg_ms
            FROM job_runs
        "#;
        let row = match job_name {
            Some(name) => {
                let query = format!("{base} WHERE job_name = $1");
                sqlx::query(&query).bind(name).fetch_one(&pool).await?
            }
            None => sqlx::query(base).fetch_one(&pool).await?,
        };

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
            let job_row = sqlx::query("SELECT last_run, next_run FROM jobs WHERE name = $1")
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
        let result = sqlx::query(
            r#"
            INSERT INTO locks (job_name, worker_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_name) DO UPDATE SET
                worker_id = excluded.worker_id,
                expires_at = excluded.expires_at
            WHERE locks.worker_id = excluded.worker_id OR locks.expires_at <= $4
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
        let result = sqlx::query("DELETE FROM locks WHERE job_name = $1 AND worker_id = $2")
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
            sqlx::query("UPDATE locks SET expires_at = $1 WHERE job_name = $2 AND worker_id = $3")
                .bind(expires_at)
                .bind(job_name)
                .bind(worker_id)
                .execute(&pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
