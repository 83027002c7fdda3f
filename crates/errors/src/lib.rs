use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronxError {
    #[error("无效的配置: {0}")]
    InvalidConfiguration(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidSchedule { expr: String, message: String },
    #[error("存储不可用: {0}")]
    StorageUnavailable(String),
    #[error("存储错误: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("存储操作错误: {0}")]
    StorageOperation(String),
    #[error("Redis错误: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("任务未找到: {name}")]
    JobNotFound { name: String },
    #[error("任务执行失败: {job} - {message}")]
    JobExecution { job: String, message: String },
    #[error("不支持的存储类型: {0}")]
    UnsupportedStorage(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type CronxResult<T> = Result<T, CronxError>;

impl CronxError {
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn invalid_schedule<S: Into<String>, M: Into<String>>(expr: S, message: M) -> Self {
        Self::InvalidSchedule {
            expr: expr.into(),
            message: message.into(),
        }
    }

    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn storage_operation<S: Into<String>>(msg: S) -> Self {
        Self::StorageOperation(msg.into())
    }

    pub fn job_not_found<S: Into<String>>(name: S) -> Self {
        Self::JobNotFound { name: name.into() }
    }

    pub fn job_execution<J: Into<String>, M: Into<String>>(job: J, message: M) -> Self {
        Self::JobExecution {
            job: job.into(),
            message: message.into(),
        }
    }

    /// 判断错误是否可以通过重试恢复
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CronxError::Storage(_)
                | CronxError::StorageOperation(_)
                | CronxError::StorageUnavailable(_)
                | CronxError::Redis(_)
        )
    }
}

impl From<serde_json::Error> for CronxError {
    fn from(err: serde_json::Error) -> Self {
        CronxError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CronxError {
    fn from(err: anyhow::Error) -> Self {
        CronxError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CronxError::job_not_found("nightly-report");
        assert_eq!(err.to_string(), "任务未找到: nightly-report");

        let err = CronxError::invalid_schedule("bad expr", "expected 6 fields");
        assert!(err.to_string().contains("bad expr"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CronxError::storage_operation("connection reset").is_retryable());
        assert!(!CronxError::invalid_configuration("缺少任务名称").is_retryable());
        assert!(!CronxError::job_execution("j", "boom").is_retryable());
    }
}
