pub mod config;
pub mod entities;
pub mod handler;
pub mod metrics;
pub mod store;

pub use config::{
    CronxConfig, Timezone, DEFAULT_LOCK_EXTEND_INTERVAL_MS, DEFAULT_LOCK_TTL_MS, MAX_JOB_NAME_LEN,
};
pub use entities::{BackoffPolicy, Job, JobLock, JobOptions, JobRun, JobRunStatus, JobStats};
pub use handler::{job_handler, HandlerEntry, HandlerRegistry, JobCallback, JobFuture, JobHandler};
pub use metrics::{MetricsSink, NoopMetrics};
pub use store::JobStore;
