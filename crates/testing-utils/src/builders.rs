//! Test data builders for creating test entities
//!
//! Builder patterns with sensible defaults and easy customization,
//! shared by unit and integration tests across the workspace.

use chrono::{DateTime, Utc};
use cronx_domain::{BackoffPolicy, Job, JobOptions, JobRun, JobRunStatus};

/// Builder for creating test Job entities
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: Job::new("test_job", "0 * * * * *", JobOptions::default()),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.name = name.to_string();
        self
    }

    pub fn with_schedule(mut self, schedule: &str) -> Self {
        self.job.schedule = schedule.to_string();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.job.options.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.job.options.backoff = backoff;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.job.options.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn paused(mut self) -> Self {
        self.job.is_paused = true;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test JobRun entities
pub struct JobRunBuilder {
    run: JobRun,
}

impl JobRunBuilder {
    pub fn new(job_name: &str) -> Self {
        Self {
            run: JobRun::new(job_name, 1),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.run.attempt = attempt;
        self
    }

    pub fn with_status(mut self, status: JobRunStatus) -> Self {
        self.run.status = status;
        self
    }

    pub fn started_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.run.start_time = Some(start_time);
        self
    }

    pub fn finished_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.run.end_time = Some(end_time);
        self
    }

    pub fn completed(mut self, result: serde_json::Value) -> Self {
        self.run.mark_running();
        self.run.mark_completed(Some(result));
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.run.mark_running();
        self.run.mark_failed(error);
        self
    }

    pub fn build(self) -> JobRun {
        self.run
    }
}
