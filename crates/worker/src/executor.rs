use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cronx_domain::{
    BackoffPolicy, HandlerEntry, HandlerRegistry, Job, JobCallback, JobRun, JobStore, MetricsSink,
};
use cronx_errors::{CronxError, CronxResult};
use tracing::{debug, info, warn};

use crate::lock_manager::LockManager;

/// 固定退避的间隔（毫秒）
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
/// 指数退避的倍率
pub const BACKOFF_FACTOR: u64 = 2;
/// 指数退避的上限（毫秒）
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// 第 `attempt` 次尝试失败后的退避时长
pub fn backoff_delay(policy: BackoffPolicy, attempt: u32) -> Duration {
    match policy {
        BackoffPolicy::Fixed => Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        BackoffPolicy::Exponential => {
            let exp = attempt.saturating_sub(1).min(31);
            let ms = DEFAULT_BACKOFF_BASE_MS.saturating_mul(BACKOFF_FACTOR.saturating_pow(exp));
            Duration::from_millis(ms.min(MAX_BACKOFF_MS))
        }
    }
}

/// 任务执行器
///
/// 驱动一次逻辑执行（含全部重试）。输入任务，输出终态执行记录。
/// 超时从执行器视角是抢占式的：到期即记失败并进入重试；`tokio::time::timeout`
/// 会丢弃处理函数的 future，所以这里的取消是真实的协作式取消。
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HandlerRegistry,
    metrics: Arc<dyn MetricsSink>,
    worker_id: String,
    lock_ttl: Duration,
    lock_extend_interval: Duration,
    in_flight: AtomicI64,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: HandlerRegistry,
        metrics: Arc<dyn MetricsSink>,
        worker_id: impl Into<String>,
        lock_ttl: Duration,
        lock_extend_interval: Duration,
    ) -> Self {
        Self {
            store,
            handlers,
            metrics,
            worker_id: worker_id.into(),
            lock_ttl,
            lock_extend_interval,
            in_flight: AtomicI64::new(0),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 执行一次任务（含重试），返回终态执行记录。
    /// 重试耗尽后返回 `JobExecution` 错误，最后一条失败记录已持久化。
    pub async fn execute(&self, job: &Job) -> CronxResult<JobRun> {
        // 暂停标记可能刚刚变化，以存储中的最新状态为准
        let job = match self.store.get_job(&job.name).await? {
            Some(latest) => latest,
            None => job.clone(),
        };

        if job.is_paused {
            debug!(job = %job.name, "任务已暂停, 跳过执行");
            let run = JobRun::skipped(job.name.as_str(), "paused");
            self.store.save_job_run(&run).await?;
            return Ok(run);
        }

        let lock = LockManager::new(
            Arc::clone(&self.store),
            job.name.as_str(),
            self.worker_id.as_str(),
            self.lock_ttl,
            self.lock_extend_interval,
        );
        if !lock.acquire().await? {
            debug!(job = %job.name, "锁被其他 Worker 持有, 跳过执行");
            let run = JobRun::skipped(job.name.as_str(), "already running on another worker");
            self.store.save_job_run(&run).await?;
            return Ok(run);
        }

        let queued = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.update_queue_size(&self.worker_id, queued);
        lock.start_keepalive();

        let result = self.run_attempts(&job).await;

        // 所有退出路径都经过这里释放锁
        lock.release().await;
        let queued = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.update_queue_size(&self.worker_id, queued);

        result
    }

    async fn run_attempts(&self, job: &Job) -> CronxResult<JobRun> {
        let entry = self.handlers.get(&job.name).ok_or_else(|| {
            CronxError::invalid_configuration(format!("任务 {} 没有注册处理函数", job.name))
        })?;

        // last_run 属于任务元数据，在真正开始执行时更新一次
        let mut latest = job.clone();
        latest.last_run = Some(Utc::now());
        latest.touch();
        if let Err(e) = self.store.save_job(&latest).await {
            warn!(job = %job.name, error = %e, "更新 last_run 失败");
        }

        let total_attempts = job.options.retries + 1;
        let mut run = JobRun::new(job.name.as_str(), 1);
        self.store.save_job_run(&run).await?;

        loop {
            run.mark_running();
            self.store.save_job_run(&run).await?;
            self.metrics.record_job_started(&job.name, &self.worker_id);
            let started = Instant::now();

            let outcome = invoke_handler(&entry, job.options.timeout_ms).await;
            let duration = started.elapsed().as_secs_f64();

            match outcome {
                Ok(value) => {
                    run.mark_completed(Some(value));
                    self.store.save_job_run(&run).await?;
                    self.metrics
                        .record_job_completed(&job.name, &self.worker_id, duration);
                    if let Some(callback) = &entry.on_success {
                        invoke_callback(callback, &run, "on_success");
                    }
                    info!(job = %job.name, attempt = run.attempt, "任务执行成功");
                    return Ok(run);
                }
                Err(message) => {
                    run.mark_failed(message.as_str());
                    self.store.save_job_run(&run).await?;
                    self.metrics.record_job_failed(
                        &job.name,
                        &self.worker_id,
                        duration,
                        error_kind(&message),
                    );
                    if let Some(callback) = &entry.on_error {
                        invoke_callback(callback, &run, "on_error");
                    }
                    warn!(
                        job = %job.name,
                        attempt = run.attempt,
                        error = %message,
                        "任务尝试失败"
                    );

                    if run.attempt >= total_attempts {
                        return Err(CronxError::job_execution(job.name.as_str(), message));
                    }

                    let delay = backoff_delay(job.options.backoff, run.attempt);
                    debug!(job = %job.name, delay_ms = delay.as_millis() as u64, "退避等待后重试");
                    tokio::time::sleep(delay).await;

                    // 每次尝试都是一条新记录
                    run = JobRun::new(job.name.as_str(), run.attempt + 1);
                    self.store.save_job_run(&run).await?;
                }
            }
        }
    }
}

async fn invoke_handler(
    entry: &HandlerEntry,
    timeout_ms: Option<u64>,
) -> Result<serde_json::Value, String> {
    let future = (entry.handler)();
    match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {ms} ms")),
        },
        None => future.await.map_err(|e| e.to_string()),
    }
}

fn invoke_callback(callback: &JobCallback, run: &JobRun, kind: &str) {
    if let Err(e) = callback(run) {
        warn!(job = %run.job_name, callback = kind, error = %e, "回调执行失败, 已忽略");
    }
}

fn error_kind(message: &str) -> &'static str {
    if message.starts_with("timed out") {
        "timeout"
    } else {
        "handler"
    }
}
