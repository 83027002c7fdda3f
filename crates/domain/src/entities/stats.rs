use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行统计汇总
///
/// `average_duration_ms` 对所有同时具备开始/结束时间的记录取平均，
/// 包含非终态尝试产生的失败记录。`last_run`/`next_run` 仅在按任务查询时填充。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub average_duration_ms: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl JobStats {
    /// 从一组执行记录聚合统计值
    pub fn aggregate(runs: &[super::JobRun]) -> Self {
        let mut stats = JobStats {
            total_runs: runs.len() as u64,
            ..Default::default()
        };

        let mut total_duration = 0i64;
        let mut timed_runs = 0u64;
        for run in runs {
            match run.status {
                super::JobRunStatus::Completed => stats.successful_runs += 1,
                super::JobRunStatus::Failed => stats.failed_runs += 1,
                _ => {}
            }
            if let Some(ms) = run.duration_ms() {
                total_duration += ms;
                timed_runs += 1;
            }
        }
        if timed_runs > 0 {
            stats.average_duration_ms = total_duration as f64 / timed_runs as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::super::{JobRun, JobRunStatus};
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_aggregate() {
        let now = Utc::now();
        let mut completed = JobRun::new("j", 1);
        completed.status = JobRunStatus::Completed;
        completed.start_time = Some(now);
        completed.end_time = Some(now + Duration::milliseconds(100));

        let mut failed = JobRun::new("j", 2);
        failed.status = JobRunStatus::Failed;
        failed.start_time = Some(now);
        failed.end_time = Some(now + Duration::milliseconds(300));

        let pending = JobRun::new("j", 1);

        let stats = JobStats::aggregate(&[completed, failed, pending]);
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert!((stats.average_duration_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_empty() {
        let stats = JobStats::aggregate(&[]);
        assert_eq!(stats.total_runs, 0);
        assert_eq!(stats.average_duration_ms, 0.0);
    }
}
