use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cronx_domain::{Job, JobLock, JobRun, JobStats, JobStore};
use cronx_errors::CronxResult;

/// 内存存储
///
/// 单进程内嵌场景与测试使用。整个状态挂在一把互斥锁下，
/// `acquire_lock` 的检查和写入在同一个临界区内完成。
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<String, Job>,
    runs: HashMap<String, JobRun>,
    locks: HashMap<String, JobLock>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// start_time 降序，空值排最后，同一时刻按 attempt 降序
pub(crate) fn run_listing_order(a: &JobRun, b: &JobRun) -> Ordering {
    match (a.start_time, b.start_time) {
        (Some(at), Some(bt)) => bt.cmp(&at).then_with(|| b.attempt.cmp(&a.attempt)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.attempt.cmp(&a.attempt),
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn connect(&self) -> CronxResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> CronxResult<()> {
        Ok(())
    }

    async fn save_job(&self, job: &Job) -> CronxResult<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.name.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, name: &str) -> CronxResult<Option<Job>> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.get(name).cloned())
    }

    async fn list_jobs(&self) -> CronxResult<Vec<Job>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn delete_job(&self, name: &str) -> CronxResult<bool> {
        let mut state = self.state.lock().unwrap();
        let existed = state.jobs.remove(name).is_some();
        if existed {
            state.runs.retain(|_, run| run.job_name != name);
            state.locks.remove(name);
        }
        Ok(existed)
    }

    async fn pause_job(&self, name: &str) -> CronxResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(name) {
            Some(job) => {
                job.is_paused = true;
                job.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resume_job(&self, name: &str) -> CronxResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(name) {
            Some(job) => {
                job.is_paused = false;
                job.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_job_run(&self, run: &JobRun) -> CronxResult<()> {
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_job_run(&self, id: &str) -> CronxResult<Option<JobRun>> {
        let state = self.state.lock().unwrap();
        Ok(state.runs.get(id).cloned())
    }

    async fn get_job_runs(
        &self,
        job_name: &str,
        limit: Option<usize>,
    ) -> CronxResult<Vec<JobRun>> {
        let state = self.state.lock().unwrap();
        let mut runs: Vec<JobRun> = state
            .runs
            .values()
            .filter(|run| run.job_name == job_name)
            .cloned()
            .collect();
        runs.sort_by(run_listing_order);
        if let Some(limit) = limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn get_job_stats(&self, job_name: Option<&str>) -> CronxResult<JobStats> {
        let state = self.state.lock().unwrap();
        let runs: Vec<JobRun> = state
            .runs
            .values()
            .filter(|run| job_name.map_or(true, |name| run.job_name == name))
            .cloned()
            .collect();
        let mut stats = JobStats::aggregate(&runs);
        if let Some(name) = job_name {
            if let Some(job) = state.jobs.get(name) {
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
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let takeable = match state.locks.get(job_name) {
            None => true,
            Some(lock) => lock.is_expired(now) || lock.is_held_by(worker_id),
        };
        if takeable {
            let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);
            state
                .locks
                .insert(job_name.to_string(), JobLock::new(job_name, worker_id, expires_at));
        }
        Ok(takeable)
    }

    async fn release_lock(&self, job_name: &str, worker_id: &str) -> CronxResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.locks.get(job_name) {
            Some(lock) if lock.is_held_by(worker_id) => {
                state.locks.remove(job_name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_lock(
        &self,
        job_name: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> CronxResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.locks.get_mut(job_name) {
            Some(lock) if lock.is_held_by(worker_id) => {
                lock.expires_at =
                    Utc::now() + chrono::Duration::milliseconds(ttl.as_millis() as i64);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
