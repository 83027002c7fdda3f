use cronx_errors::{CronxError, CronxResult};
use serde::{Deserialize, Serialize};

/// 默认锁 TTL（毫秒）
pub const DEFAULT_LOCK_TTL_MS: u64 = 60_000;
/// 默认锁续期间隔（毫秒），TTL 的一半
pub const DEFAULT_LOCK_EXTEND_INTERVAL_MS: u64 = 30_000;
/// 任务名长度上限
pub const MAX_JOB_NAME_LEN: usize = 255;

/// CRON 表达式求值所用的时区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Timezone {
    /// 进程本地时区（未指定时的默认值）
    #[default]
    Local,
    Utc,
}

/// Coordinator 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronxConfig {
    /// 存储后端 URI：memory:// | sqlite://PATH | postgres://... | redis://...
    pub storage_url: String,
    /// Worker 身份标识，缺省时生成随机 uuid
    pub worker_id: Option<String>,
    pub timezone: Timezone,
    pub lock_ttl_ms: u64,
    pub lock_extend_interval_ms: u64,
}

impl Default for CronxConfig {
    fn default() -> Self {
        Self {
            storage_url: "memory://".to_string(),
            worker_id: None,
            timezone: Timezone::default(),
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_extend_interval_ms: DEFAULT_LOCK_EXTEND_INTERVAL_MS,
        }
    }
}

impl CronxConfig {
    /// 使用指定存储后端的配置
    pub fn with_storage_url(url: impl Into<String>) -> Self {
        Self {
            storage_url: url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> CronxResult<()> {
        if self.storage_url.trim().is_empty() {
            return Err(CronxError::invalid_configuration("storage_url 不能为空"));
        }
        if self.lock_ttl_ms == 0 {
            return Err(CronxError::invalid_configuration("lock_ttl_ms 必须大于 0"));
        }
        // 续期间隔必须严格小于 TTL，否则锁会在两次续期之间过期
        if self.lock_extend_interval_ms >= self.lock_ttl_ms {
            return Err(CronxError::invalid_configuration(
                "lock_extend_interval_ms 必须小于 lock_ttl_ms",
            ));
        }
        if let Some(worker_id) = &self.worker_id {
            if worker_id.trim().is_empty() {
                return Err(CronxError::invalid_configuration("worker_id 不能为空字符串"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CronxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_ttl_ms, 60_000);
        assert_eq!(config.lock_extend_interval_ms, 30_000);
        assert_eq!(config.timezone, Timezone::Local);
    }

    #[test]
    fn test_extend_interval_must_be_below_ttl() {
        let config = CronxConfig {
            lock_ttl_ms: 1_000,
            lock_extend_interval_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_storage_url_rejected() {
        let config = CronxConfig {
            storage_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
