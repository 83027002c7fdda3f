mod job;
mod job_run;
mod lock;
mod stats;

pub use job::{BackoffPolicy, Job, JobOptions};
pub use job_run::{JobRun, JobRunStatus};
pub use lock::JobLock;
pub use stats::JobStats;
