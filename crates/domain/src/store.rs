use std::time::Duration;

use async_trait::async_trait;
use cronx_errors::CronxResult;

use crate::entities::{Job, JobRun, JobStats};

/// 存储后端统一接口
///
/// 所有后端必须满足同一份语义契约，差异只允许出现在原子性的实现方式上：
///
/// - `connect` 幂等地创建缺失的表结构 / 键空间约定；
/// - `save_job` 按 `name` upsert，整体覆盖字段，并发以最后写入者为准；
/// - `save_job_run` 按 `id` upsert，一条记录跨状态迁移保持同一行；
/// - `get_job_runs` 必须按 `start_time` 降序返回（空值排在最后，
///   `start_time` 相同按 `attempt` 降序），`limit` 存在时限制条数；
/// - `acquire_lock` 必须由后端原子实现（条件写入 / CAS / SET NX PX），
///   禁止适配器内先读后写。成功条件：锁不存在，或已过期，或属于调用者；
///   成功后锁属于调用者且 `expires_at = now + ttl`；
/// - `release_lock` 仅在 worker_id 匹配时删除，过期的调用是 no-op；
/// - `extend_lock` 仅在 worker_id 匹配时顺延，所有权丢失返回 false。
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn connect(&self) -> CronxResult<()>;
    async fn disconnect(&self) -> CronxResult<()>;

    async fn save_job(&self, job: &Job) -> CronxResult<()>;
    async fn get_job(&self, name: &str) -> CronxResult<Option<Job>>;
    async fn list_jobs(&self) -> CronxResult<Vec<Job>>;
    /// 删除任务并级联删除其执行记录与锁，返回是否存在过
    async fn delete_job(&self, name: &str) -> CronxResult<bool>;
    /// 设置 `is_paused = true` 并更新 `updated_at`，返回记录是否存在
    async fn pause_job(&self, name: &str) -> CronxResult<bool>;
    async fn resume_job(&self, name: &str) -> CronxResult<bool>;

    async fn save_job_run(&self, run: &JobRun) -> CronxResult<()>;
    async fn get_job_run(&self, id: &str) -> CronxResult<Option<JobRun>>;
    async fn get_job_runs(&self, job_name: &str, limit: Option<usize>)
        -> CronxResult<Vec<JobRun>>;
    async fn get_job_stats(&self, job_name: Option<&str>) -> CronxResult<JobStats>;

    async fn acquire_lock(&self, job_name: &str, worker_id: &str, ttl: Duration)
        -> CronxResult<bool>;
    async fn release_lock(&self, job_name: &str, worker_id: &str) -> CronxResult<bool>;
    async fn extend_lock(&self, job_name: &str, worker_id: &str, ttl: Duration)
        -> CronxResult<bool>;
}
