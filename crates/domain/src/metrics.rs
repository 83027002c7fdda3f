/// 指标接收器
///
/// 核心只通过这五个记录方法向外发射样本，`snapshot` 导出当前文本形态。
/// no-op 实现必须可用，核心不关心背后是否接了 prometheus。
pub trait MetricsSink: Send + Sync {
    fn record_job_scheduled(&self, job_name: &str, worker_id: &str);
    fn record_job_started(&self, job_name: &str, worker_id: &str);
    fn record_job_completed(&self, job_name: &str, worker_id: &str, duration_seconds: f64);
    fn record_job_failed(
        &self,
        job_name: &str,
        worker_id: &str,
        duration_seconds: f64,
        error_kind: &str,
    );
    fn update_queue_size(&self, worker_id: &str, size: i64);
    fn snapshot(&self) -> String;
}

/// 丢弃全部样本的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_job_scheduled(&self, _job_name: &str, _worker_id: &str) {}
    fn record_job_started(&self, _job_name: &str, _worker_id: &str) {}
    fn record_job_completed(&self, _job_name: &str, _worker_id: &str, _duration_seconds: f64) {}
    fn record_job_failed(
        &self,
        _job_name: &str,
        _worker_id: &str,
        _duration_seconds: f64,
        _error_kind: &str,
    ) {
    }
    fn update_queue_size(&self, _worker_id: &str, _size: i64) {}
    fn snapshot(&self) -> String {
        String::new()
    }
}
