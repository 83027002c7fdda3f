use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务互斥锁记录
///
/// 每个任务名最多存在一条锁记录；`expires_at <= now` 的锁在语义上等同于
/// 不存在，任何竞争者都可以将其夺走。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLock {
    pub job_name: String,
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

impl JobLock {
    pub fn new(
        job_name: impl Into<String>,
        worker_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            worker_id: worker_id.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.worker_id == worker_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let lock = JobLock::new("j", "w1", now + Duration::seconds(1));
        assert!(!lock.is_expired(now));
        // 恰好到达过期时刻即视为过期
        assert!(lock.is_expired(now + Duration::seconds(1)));
        assert!(lock.is_held_by("w1"));
        assert!(!lock.is_held_by("w2"));
    }
}
