mod memory;
mod postgres;
mod redis;
mod sqlite;

pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;
pub use redis::RedisJobStore;
pub use sqlite::SqliteJobStore;

use std::sync::Arc;

use cronx_domain::JobStore;
use cronx_errors::{CronxError, CronxResult};
use tracing::info;

/// 按 URI scheme 选择存储后端
///
/// - `memory://`                     内存存储
/// - `sqlite://PATH`                 内嵌 SQLite
/// - `postgres://` / `postgresql://` PostgreSQL
/// - `redis://` / `rediss://`        Redis
///
/// 返回的适配器尚未连接，`connect()` 由调用方在启动时执行。
pub fn create_job_store(url: &str) -> CronxResult<Arc<dyn JobStore>> {
    let scheme = match url.split_once("://") {
        Some((scheme, _)) => scheme,
        None => return Err(CronxError::UnsupportedStorage(url.to_string())),
    };

    let store: Arc<dyn JobStore> = match scheme {
        "memory" => Arc::new(MemoryJobStore::new()),
        "sqlite" => Arc::new(SqliteJobStore::new(url)),
        "postgres" | "postgresql" => Arc::new(PostgresJobStore::new(url)),
        "redis" | "rediss" => Arc::new(RedisJobStore::new(url)),
        other => return Err(CronxError::UnsupportedStorage(other.to_string())),
    };
    info!(scheme, "已选择存储后端");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_selection() {
        assert!(create_job_store("memory://").is_ok());
        assert!(create_job_store("sqlite:///tmp/cronx.db").is_ok());
        assert!(create_job_store("postgres://localhost/cronx").is_ok());
        assert!(create_job_store("postgresql://localhost/cronx").is_ok());
        assert!(create_job_store("redis://localhost:6379").is_ok());
        assert!(create_job_store("rediss://localhost:6380").is_ok());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let err = create_job_store("mongodb://localhost").unwrap_err();
        assert!(matches!(err, CronxError::UnsupportedStorage(_)));
        assert!(matches!(
            create_job_store("not-a-url").unwrap_err(),
            CronxError::UnsupportedStorage(_)
        ));
    }
}
