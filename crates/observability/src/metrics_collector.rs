use anyhow::Result;
use cronx_domain::MetricsSink;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Prometheus-backed metrics collector for the scheduling engine
///
/// Holds its own registry so that `snapshot()` can render the current
/// text exposition without touching any global state.
pub struct MetricsCollector {
    registry: Registry,

    jobs_scheduled_total: IntCounterVec,
    jobs_started_total: IntCounterVec,
    jobs_completed_total: IntCounterVec,
    jobs_failed_total: IntCounterVec,
    job_duration_seconds: HistogramVec,
    queue_size: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_scheduled_total = IntCounterVec::new(
            Opts::new("cronx_jobs_scheduled_total", "Total number of jobs registered"),
            &["job", "worker"],
        )?;
        registry.register(Box::new(jobs_scheduled_total.clone()))?;

        let jobs_started_total = IntCounterVec::new(
            Opts::new("cronx_jobs_started_total", "Total number of job attempts started"),
            &["job", "worker"],
        )?;
        registry.register(Box::new(jobs_started_total.clone()))?;

        let jobs_completed_total = IntCounterVec::new(
            Opts::new(
                "cronx_jobs_completed_total",
                "Total number of job attempts completed successfully",
            ),
            &["job", "worker"],
        )?;
        registry.register(Box::new(jobs_completed_total.clone()))?;

        let jobs_failed_total = IntCounterVec::new(
            Opts::new("cronx_jobs_failed_total", "Total number of failed job attempts"),
            &["job", "worker", "kind"],
        )?;
        registry.register(Box::new(jobs_failed_total.clone()))?;

        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new("cronx_job_duration_seconds", "Job attempt duration in seconds"),
            &["job", "worker"],
        )?;
        registry.register(Box::new(job_duration_seconds.clone()))?;

        let queue_size = IntGaugeVec::new(
            Opts::new("cronx_queue_size", "Number of in-flight executions per worker"),
            &["worker"],
        )?;
        registry.register(Box::new(queue_size.clone()))?;

        Ok(Self {
            registry,
            jobs_scheduled_total,
            jobs_started_total,
            jobs_completed_total,
            jobs_failed_total,
            job_duration_seconds,
            queue_size,
        })
    }
}

impl MetricsSink for MetricsCollector {
    fn record_job_scheduled(&self, job_name: &str, worker_id: &str) {
        self.jobs_scheduled_total
            .with_label_values(&[job_name, worker_id])
            .inc();
    }

    fn record_job_started(&self, job_name: &str, worker_id: &str) {
        self.jobs_started_total
            .with_label_values(&[job_name, worker_id])
            .inc();
    }

    fn record_job_completed(&self, job_name: &str, worker_id: &str, duration_seconds: f64) {
        self.jobs_completed_total
            .with_label_values(&[job_name, worker_id])
            .inc();
        self.job_duration_seconds
            .with_label_values(&[job_name, worker_id])
            .observe(duration_seconds);
    }

    fn record_job_failed(
        &self,
        job_name: &str,
        worker_id: &str,
        duration_seconds: f64,
        error_kind: &str,
    ) {
        self.jobs_failed_total
            .with_label_values(&[job_name, worker_id, error_kind])
            .inc();
        self.job_duration_seconds
            .with_label_values(&[job_name, worker_id])
            .observe(duration_seconds);
    }

    fn update_queue_size(&self, worker_id: &str, size: i64) {
        self.queue_size.with_label_values(&[worker_id]).set(size);
    }

    fn snapshot(&self) -> String {
        let metric_families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_contains_samples() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_job_scheduled("hb", "w1");
        metrics.record_job_started("hb", "w1");
        metrics.record_job_completed("hb", "w1", 0.25);
        metrics.record_job_failed("hb", "w1", 1.5, "timeout");
        metrics.update_queue_size("w1", 2);

        let snapshot = metrics.snapshot();
        assert!(snapshot.contains("cronx_jobs_scheduled_total"));
        assert!(snapshot.contains("cronx_jobs_started_total"));
        assert!(snapshot.contains("cronx_jobs_completed_total"));
        assert!(snapshot.contains("cronx_jobs_failed_total"));
        assert!(snapshot.contains("cronx_job_duration_seconds"));
        assert!(snapshot.contains("cronx_queue_size"));
        assert!(snapshot.contains("kind=\"timeout\""));
    }

    #[test]
    fn test_collectors_are_isolated() {
        // 每个实例有独立的 registry，互不串样本
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.record_job_started("only-a", "w1");
        assert!(!b.snapshot().contains("only-a"));
    }
}
