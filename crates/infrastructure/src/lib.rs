pub mod storage;

pub use storage::{
    create_job_store, MemoryJobStore, PostgresJobStore, RedisJobStore, SqliteJobStore,
};
