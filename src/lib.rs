//! # cronx
//!
//! 可靠的分布式 CRON 任务调度引擎。进程注册带 cron 表达式和异步处理函数
//! 的命名任务；引擎按计划触发，在重试 / 退避 / 超时策略下执行，并把任务
//! 定义与执行记录持久化到可插拔的存储后端。多个 Worker 共享同一存储时，
//! 通过 TTL 锁保证同一任务实例至多在一个 Worker 上执行。
//!
//! ```no_run
//! use std::sync::Arc;
//! use cronx::{job_handler, Coordinator, CronxConfig, JobSpec};
//!
//! # async fn demo() -> cronx::CronxResult<()> {
//! let coordinator = Coordinator::new(CronxConfig::with_storage_url("memory://"))?;
//! coordinator
//!     .schedule(
//!         "*/5 * * * * *",
//!         job_handler(|| async { Ok(serde_json::json!({"ok": true})) }),
//!         JobSpec::named("heartbeat"),
//!     )
//!     .await?;
//! coordinator.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;

pub use coordinator::{Coordinator, JobSpec};

pub use cronx_dispatcher::{CronSchedule, JobScheduler};
pub use cronx_domain::{
    job_handler, BackoffPolicy, CronxConfig, Job, JobCallback, JobHandler, JobOptions, JobRun,
    JobRunStatus, JobStats, JobStore, MetricsSink, NoopMetrics, Timezone,
};
pub use cronx_errors::{CronxError, CronxResult};
pub use cronx_infrastructure::{
    create_job_store, MemoryJobStore, PostgresJobStore, RedisJobStore, SqliteJobStore,
};
pub use cronx_observability::{init_telemetry, MetricsCollector};
pub use cronx_worker::{backoff_delay, JobExecutor, LockManager};
