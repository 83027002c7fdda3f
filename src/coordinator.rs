use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronx_dispatcher::{CronSchedule, JobScheduler};
use cronx_domain::{
    CronxConfig, HandlerEntry, HandlerRegistry, Job, JobCallback, JobHandler, JobOptions, JobRun,
    JobStats, JobStore, MetricsSink, NoopMetrics, MAX_JOB_NAME_LEN,
};
use cronx_errors::{CronxError, CronxResult};
use cronx_infrastructure::create_job_store;
use cronx_worker::JobExecutor;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 注册任务时的参数：名称、持久化选项与进程内回调
pub struct JobSpec {
    pub name: String,
    pub options: JobOptions,
    pub on_success: Option<JobCallback>,
    pub on_error: Option<JobCallback>,
}

impl JobSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: JobOptions::default(),
            on_success: None,
            on_error: None,
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_success(mut self, callback: JobCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: JobCallback) -> Self {
        self.on_error = Some(callback);
        self
    }
}

/// 调度引擎门面
///
/// 一个进程实例化一个 Coordinator：注册任务、管理生命周期、手动触发、
/// 读取统计。多个进程共享同一存储时，通过存储层的原子锁协调，
/// 同一任务实例同一时刻至多在一个 Worker 上执行。
pub struct Coordinator {
    config: CronxConfig,
    store: Arc<dyn JobStore>,
    handlers: HandlerRegistry,
    scheduler: JobScheduler,
    executor: Arc<JobExecutor>,
    metrics: Arc<dyn MetricsSink>,
    worker_id: String,
    running: AtomicBool,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("worker_id", &self.worker_id)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// 使用默认（no-op）指标接收器创建
    pub fn new(config: CronxConfig) -> CronxResult<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(config: CronxConfig, metrics: Arc<dyn MetricsSink>) -> CronxResult<Self> {
        config.validate()?;
        let store = create_job_store(&config.storage_url)?;
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let handlers = HandlerRegistry::new();
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&store),
            handlers.clone(),
            Arc::clone(&metrics),
            worker_id.clone(),
            Duration::from_millis(config.lock_ttl_ms),
            Duration::from_millis(config.lock_extend_interval_ms),
        ));

        // 到点后把执行交到独立任务上，定时循环立即重新布防
        let fire_executor = Arc::clone(&executor);
        let scheduler = JobScheduler::new(
            config.timezone,
            Arc::new(move |job: Job| {
                let executor = Arc::clone(&fire_executor);
                tokio::spawn(async move {
                    // 定时触发没有调用方可以接收错误，只记日志
                    if let Err(e) = executor.execute(&job).await {
                        error!(job = %job.name, error = %e, "定时执行失败");
                    }
                });
            }),
        );

        Ok(Self {
            config,
            store,
            handlers,
            scheduler,
            executor,
            metrics,
            worker_id,
            running: AtomicBool::new(false),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 注册任务：校验、持久化、登记处理函数；运行中时与注册一并布防。
    /// 同名任务被覆盖（保留原 created_at）。
    pub async fn schedule(
        &self,
        expression: &str,
        handler: JobHandler,
        spec: JobSpec,
    ) -> CronxResult<Job> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(CronxError::invalid_configuration("任务名称不能为空"));
        }
        if name.len() > MAX_JOB_NAME_LEN {
            return Err(CronxError::invalid_configuration(format!(
                "任务名称超过 {MAX_JOB_NAME_LEN} 字符"
            )));
        }
        let schedule = CronSchedule::new(expression)?;

        let mut job = Job::new(name, expression, spec.options);
        if let Some(existing) = self.store.get_job(name).await? {
            job.created_at = existing.created_at;
        }
        job.next_run = schedule.next_after(Utc::now(), self.config.timezone);

        let mut entry = HandlerEntry::new(handler);
        entry.on_success = spec.on_success;
        entry.on_error = spec.on_error;
        self.handlers.register(name, entry);

        self.store.save_job(&job).await?;
        if self.is_running() {
            self.scheduler.add_job(job.clone())?;
        }
        self.metrics.record_job_scheduled(name, &self.worker_id);
        info!(job = %name, schedule = %expression, "任务已注册");
        Ok(job)
    }

    /// 注销任务：撤防、丢弃处理函数、从存储删除（级联删除执行记录）
    pub async fn unschedule(&self, name: &str) -> CronxResult<bool> {
        self.scheduler.remove_job(name);
        self.handlers.remove(name);
        let existed = self.store.delete_job(name).await?;
        if existed {
            info!(job = %name, "任务已注销");
        }
        Ok(existed)
    }

    pub async fn get_job(&self, name: &str) -> CronxResult<Option<Job>> {
        self.store.get_job(name).await
    }

    pub async fn list_jobs(&self) -> CronxResult<Vec<Job>> {
        self.store.list_jobs().await
    }

    /// 暂停执行；定时器保持布防，执行器在到点时短路
    pub async fn pause_job(&self, name: &str) -> CronxResult<bool> {
        let existed = self.store.pause_job(name).await?;
        if existed {
            self.scheduler.set_paused(name, true);
            info!(job = %name, "任务已暂停");
        }
        Ok(existed)
    }

    pub async fn resume_job(&self, name: &str) -> CronxResult<bool> {
        let existed = self.store.resume_job(name).await?;
        if existed {
            self.scheduler.set_paused(name, false);
            info!(job = %name, "任务已恢复");
        }
        Ok(existed)
    }

    /// 带外手动触发：直接交给执行器，不扰动调度器的定时器。
    /// 重试耗尽的失败通过返回值抛出 `JobExecution`。
    pub async fn run_job(&self, name: &str) -> CronxResult<JobRun> {
        let job = self
            .store
            .get_job(name)
            .await?
            .ok_or_else(|| CronxError::job_not_found(name))?;
        self.executor.execute(&job).await
    }

    pub async fn get_job_runs(
        &self,
        name: &str,
        limit: Option<usize>,
    ) -> CronxResult<Vec<JobRun>> {
        self.store.get_job_runs(name, limit).await
    }

    pub async fn get_job_stats(&self, name: &str) -> CronxResult<JobStats> {
        self.store.get_job_stats(Some(name)).await
    }

    /// 所有任务的整体统计
    pub async fn get_stats(&self) -> CronxResult<JobStats> {
        self.store.get_job_stats(None).await
    }

    pub async fn get_upcoming_runs(
        &self,
        name: &str,
        count: usize,
    ) -> CronxResult<Vec<DateTime<Utc>>> {
        let job = self
            .store
            .get_job(name)
            .await?
            .ok_or_else(|| CronxError::job_not_found(name))?;
        let schedule = CronSchedule::new(&job.schedule)?;
        Ok(schedule.upcoming(Utc::now(), self.config.timezone, count))
    }

    /// 当前指标文本快照
    pub fn metrics_snapshot(&self) -> String {
        self.metrics.snapshot()
    }

    /// 启动：连接存储、重载任务、为有处理函数的活跃任务布防。
    /// 存储里没有对应处理函数的任务保留记录但不布防。
    pub async fn start(&self) -> CronxResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(worker = %self.worker_id, storage = %mask_url(&self.config.storage_url), "Coordinator 启动");
        self.store.connect().await?;
        self.scheduler.start();

        let jobs = self.store.list_jobs().await?;
        for job in jobs {
            if !job.is_schedulable() {
                continue;
            }
            if self.handlers.contains(&job.name) {
                if let Err(e) = self.scheduler.add_job(job.clone()) {
                    error!(job = %job.name, error = %e, "重载任务布防失败");
                }
            } else {
                warn!(job = %job.name, "存储中的任务没有本进程的处理函数, 不布防");
            }
        }
        Ok(())
    }

    /// 停止：撤掉全部定时器、断开存储；已在执行器里的任务继续跑完
    pub async fn stop(&self) -> CronxResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.stop();
        self.store.disconnect().await?;
        info!(worker = %self.worker_id, "Coordinator 已停止");
        Ok(())
    }
}

/// 屏蔽连接串里的口令
fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("postgres://user:secret@db:5432/cronx"),
            "postgres://user:***@db:5432/cronx"
        );
        assert_eq!(mask_url("memory://"), "memory://");
        assert_eq!(mask_url("sqlite:///tmp/cronx.db"), "sqlite:///tmp/cronx.db");
    }
}
