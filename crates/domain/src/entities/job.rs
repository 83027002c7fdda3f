use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务定义
///
/// `handler` 不在这里：处理函数无法序列化，只存在于注册它的 Worker 进程内
/// （见 `HandlerRegistry`）。存储中的记录永远是纯数据。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub name: String,
    pub schedule: String, // cron 表达式，5 字段或带秒的 6 字段
    pub options: JobOptions,
    pub is_active: bool,
    pub is_paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// 任务执行选项（持久化部分）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobOptions {
    /// 失败后的重试次数
    pub retries: u32,
    /// 重试间隔策略
    pub backoff: BackoffPolicy,
    /// 单次执行超时（毫秒）
    pub timeout_ms: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: BackoffPolicy::Fixed,
            timeout_ms: None,
        }
    }
}

/// 重试间隔策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    Fixed,
    Exponential,
}

impl Job {
    /// 创建新任务
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            schedule: schedule.into(),
            options,
            is_active: true,
            is_paused: false,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
        }
    }

    /// 调度器是否应该为该任务布置定时器
    ///
    /// 暂停的任务仍然保持布防，短路发生在执行器里。
    pub fn is_schedulable(&self) -> bool {
        self.is_active
    }

    /// 记录一次修改
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new("report", "0 0 2 * * *", JobOptions::default());
        assert!(job.is_active);
        assert!(!job.is_paused);
        assert!(job.last_run.is_none());
        assert!(job.next_run.is_none());
        assert!(job.updated_at >= job.created_at);
        assert_eq!(job.options.retries, 0);
        assert_eq!(job.options.backoff, BackoffPolicy::Fixed);
    }

    #[test]
    fn test_options_json_round_trip() {
        let options = JobOptions {
            retries: 3,
            backoff: BackoffPolicy::Exponential,
            timeout_ms: Some(5_000),
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"exponential\""));
        let back: JobOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_options_default_fields_omitted() {
        // 空对象应当解析出默认选项
        let options: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, JobOptions::default());
    }
}
