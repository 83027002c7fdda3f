pub mod cron_utils;
pub mod scheduler;

pub use cron_utils::CronSchedule;
pub use scheduler::{FireCallback, JobScheduler};
