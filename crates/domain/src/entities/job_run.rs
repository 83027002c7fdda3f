use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务执行记录
///
/// 一次调度触发的每个尝试（attempt）对应一条独立记录，各自有自己的 id；
/// 同一条记录在 `pending → running → completed/failed` 之间保持 id 不变。
/// 进入终态后记录不再变更。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    pub id: String,
    pub job_name: String,
    pub status: JobRunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub attempt: u32,
}

/// 执行记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Pending => "pending",
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobRunStatus::Pending),
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

impl JobRun {
    /// 创建某次尝试的新执行记录
    pub fn new(job_name: impl Into<String>, attempt: u32) -> Self {
        debug_assert!(attempt >= 1);
        Self {
            id: Uuid::new_v4().to_string(),
            job_name: job_name.into(),
            status: JobRunStatus::Pending,
            start_time: None,
            end_time: None,
            error: None,
            result: None,
            attempt,
        }
    }

    /// 合成一条"跳过执行"的记录（暂停、或锁被其他 Worker 持有）
    pub fn skipped(job_name: impl Into<String>, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_name: job_name.into(),
            status: JobRunStatus::Completed,
            start_time: Some(now),
            end_time: Some(now),
            error: None,
            result: Some(serde_json::json!({ "skipped": true, "reason": reason })),
            attempt: 1,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobRunStatus::Running;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self, result: Option<serde_json::Value>) {
        self.status = JobRunStatus::Completed;
        self.end_time = Some(Utc::now());
        self.result = result;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobRunStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// 是否已进入终态
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobRunStatus::Completed | JobRunStatus::Failed)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.status, JobRunStatus::Completed)
    }

    /// 执行时长（毫秒）
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_transitions() {
        let mut run = JobRun::new("hb", 1);
        assert_eq!(run.status, JobRunStatus::Pending);
        assert!(run.start_time.is_none());

        run.mark_running();
        assert_eq!(run.status, JobRunStatus::Running);
        assert!(run.start_time.is_some());

        run.mark_completed(Some(serde_json::json!({"ok": true})));
        assert!(run.is_finished());
        assert!(run.is_successful());
        assert!(run.end_time.unwrap() >= run.start_time.unwrap());
        assert!(run.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn test_failed_run_keeps_error() {
        let mut run = JobRun::new("hb", 2);
        run.mark_running();
        run.mark_failed("boom");
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(!run.is_successful());
        assert_eq!(run.attempt, 2);
    }

    #[test]
    fn test_skipped_run_shape() {
        let run = JobRun::skipped("hb", "paused");
        assert_eq!(run.status, JobRunStatus::Completed);
        assert_eq!(run.attempt, 1);
        let result = run.result.unwrap();
        assert_eq!(result["skipped"], serde_json::json!(true));
        assert_eq!(result["reason"], serde_json::json!("paused"));
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            JobRunStatus::Pending,
            JobRunStatus::Running,
            JobRunStatus::Completed,
            JobRunStatus::Failed,
        ] {
            assert_eq!(JobRunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobRunStatus::parse("unknown"), None);
    }
}
