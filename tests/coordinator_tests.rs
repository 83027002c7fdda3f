//! Coordinator 集成测试（内存 / SQLite 存储）

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cronx::{
    job_handler, BackoffPolicy, Coordinator, CronxConfig, CronxError, JobOptions, JobRunStatus,
    JobSpec,
};

fn memory_coordinator() -> Coordinator {
    Coordinator::new(CronxConfig::with_storage_url("memory://")).unwrap()
}

fn counting_handler(counter: Arc<AtomicUsize>) -> cronx::JobHandler {
    job_handler(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
    })
}

#[tokio::test]
async fn test_heartbeat_scenario() {
    let coordinator = memory_coordinator();
    let count = Arc::new(AtomicUsize::new(0));
    coordinator
        .schedule(
            "*/2 * * * * *",
            counting_handler(Arc::clone(&count)),
            JobSpec::named("hb"),
        )
        .await
        .unwrap();

    coordinator.start().await.unwrap();
    assert!(coordinator.is_running());
    tokio::time::sleep(Duration::from_millis(6_500)).await;
    coordinator.stop().await.unwrap();
    assert!(!coordinator.is_running());
    // 在途执行落地
    tokio::time::sleep(Duration::from_millis(300)).await;

    let runs = coordinator.get_job_runs("hb", None).await.unwrap();
    let completed: Vec<_> = runs
        .iter()
        .filter(|r| r.status == JobRunStatus::Completed)
        .collect();
    assert!(
        (2..=4).contains(&completed.len()),
        "completed {} runs",
        completed.len()
    );
    for run in &completed {
        assert_eq!(run.attempt, 1);
        assert!(run.duration_ms().unwrap() < 500);
    }
    assert_eq!(count.load(Ordering::SeqCst), completed.len());
}

#[tokio::test]
async fn test_retry_with_exponential_backoff_scenario() {
    let coordinator = memory_coordinator();
    coordinator
        .schedule(
            "0 0 0 1 1 *",
            job_handler(|| async { anyhow::bail!("这个任务总是失败") }),
            JobSpec::named("failing").with_options(JobOptions {
                retries: 2,
                backoff: BackoffPolicy::Exponential,
                timeout_ms: None,
            }),
        )
        .await
        .unwrap();
    coordinator.start().await.unwrap();

    let err = coordinator.run_job("failing").await.unwrap_err();
    assert!(matches!(err, CronxError::JobExecution { .. }));

    let mut runs = coordinator.get_job_runs("failing", None).await.unwrap();
    assert_eq!(runs.len(), 3);
    runs.sort_by_key(|r| r.attempt);
    assert_eq!(
        runs.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(runs.iter().all(|r| r.status == JobRunStatus::Failed));

    // 尝试之间的间隔约为 1000ms 与 2000ms
    let gap1 = (runs[1].start_time.unwrap() - runs[0].start_time.unwrap()).num_milliseconds();
    let gap2 = (runs[2].start_time.unwrap() - runs[1].start_time.unwrap()).num_milliseconds();
    assert!((700..=1_600).contains(&gap1), "gap1 = {gap1}ms");
    assert!((1_700..=2_600).contains(&gap2), "gap2 = {gap2}ms");

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_skips_execution_scenario() {
    let coordinator = memory_coordinator();
    let count = Arc::new(AtomicUsize::new(0));
    coordinator
        .schedule(
            "* * * * * *",
            counting_handler(Arc::clone(&count)),
            JobSpec::named("test"),
        )
        .await
        .unwrap();
    coordinator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(2_600)).await;
    assert!(coordinator.pause_job("test").await.unwrap());
    // 让在途执行落地
    tokio::time::sleep(Duration::from_millis(300)).await;
    let paused_base = count.load(Ordering::SeqCst);
    assert!(paused_base >= 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    // 暂停窗口内计数不再增长
    assert_eq!(count.load(Ordering::SeqCst), paused_base);

    // 暂停期间的触发落成 skipped 记录
    let runs = coordinator.get_job_runs("test", None).await.unwrap();
    assert!(runs.iter().any(|r| {
        r.result
            .as_ref()
            .map(|v| v["skipped"] == serde_json::json!(true)
                && v["reason"] == serde_json::json!("paused"))
            .unwrap_or(false)
    }));

    assert!(coordinator.resume_job("test").await.unwrap());
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(count.load(Ordering::SeqCst) > paused_base);

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_manual_run_out_of_band_scenario() {
    let coordinator = memory_coordinator();
    coordinator
        .schedule(
            // 实际上永远不会在测试窗口内触发
            "0 0 0 1 1 *",
            job_handler(|| async { Ok(serde_json::json!({"manual": true})) }),
            JobSpec::named("m"),
        )
        .await
        .unwrap();
    coordinator.start().await.unwrap();

    let next_before = coordinator.get_job("m").await.unwrap().unwrap().next_run;
    assert!(next_before.is_some());

    let run = coordinator.run_job("m").await.unwrap();
    assert_eq!(run.status, JobRunStatus::Completed);
    assert_eq!(run.result, Some(serde_json::json!({"manual": true})));

    // 定时器不受带外触发影响
    let next_after = coordinator.get_job("m").await.unwrap().unwrap().next_run;
    assert_eq!(next_before, next_after);

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_schedule_validation() {
    let coordinator = memory_coordinator();

    let err = coordinator
        .schedule(
            "* * * * * *",
            job_handler(|| async { Ok(serde_json::json!(null)) }),
            JobSpec::named("  "),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CronxError::InvalidConfiguration(_)));

    let err = coordinator
        .schedule(
            "",
            job_handler(|| async { Ok(serde_json::json!(null)) }),
            JobSpec::named("empty-schedule"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CronxError::InvalidSchedule { .. }));

    let err = coordinator
        .schedule(
            "not a cron at all",
            job_handler(|| async { Ok(serde_json::json!(null)) }),
            JobSpec::named("bad-schedule"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CronxError::InvalidSchedule { .. }));
}

#[tokio::test]
async fn test_unsupported_storage_scheme() {
    let err = Coordinator::new(CronxConfig::with_storage_url("mongodb://localhost")).unwrap_err();
    assert!(matches!(err, CronxError::UnsupportedStorage(_)));
}

#[tokio::test]
async fn test_run_job_unknown_name() {
    let coordinator = memory_coordinator();
    coordinator.start().await.unwrap();
    let err = coordinator.run_job("missing").await.unwrap_err();
    assert!(matches!(err, CronxError::JobNotFound { .. }));
    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_unschedule_removes_job_and_runs() {
    let coordinator = memory_coordinator();
    coordinator
        .schedule(
            "0 0 0 1 1 *",
            job_handler(|| async { Ok(serde_json::json!(null)) }),
            JobSpec::named("gone"),
        )
        .await
        .unwrap();
    coordinator.start().await.unwrap();
    coordinator.run_job("gone").await.unwrap();

    assert!(coordinator.unschedule("gone").await.unwrap());
    assert!(coordinator.get_job("gone").await.unwrap().is_none());
    assert!(coordinator.get_job_runs("gone", None).await.unwrap().is_empty());
    // 第二次注销返回 false
    assert!(!coordinator.unschedule("gone").await.unwrap());

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_zero_retries_single_run() {
    let coordinator = memory_coordinator();
    coordinator
        .schedule(
            "0 0 0 1 1 *",
            job_handler(|| async { anyhow::bail!("boom") }),
            JobSpec::named("once"),
        )
        .await
        .unwrap();
    coordinator.start().await.unwrap();

    let _ = coordinator.run_job("once").await.unwrap_err();
    let runs = coordinator.get_job_runs("once", None).await.unwrap();
    // retries=0 → 至多一条记录，终态为失败
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobRunStatus::Failed);

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_callbacks_fire_on_outcomes() {
    let coordinator = memory_coordinator();
    let successes = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&successes);
    coordinator
        .schedule(
            "0 0 0 1 1 *",
            job_handler(|| async { Ok(serde_json::json!(1)) }),
            JobSpec::named("cb-ok").on_success(Arc::new(move |_run| {
                s.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        )
        .await
        .unwrap();

    let e = Arc::clone(&errors);
    coordinator
        .schedule(
            "0 0 0 1 1 *",
            job_handler(|| async { anyhow::bail!("no") }),
            JobSpec::named("cb-err").on_error(Arc::new(move |run| {
                assert_eq!(run.status, JobRunStatus::Failed);
                e.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        )
        .await
        .unwrap();

    coordinator.start().await.unwrap();
    coordinator.run_job("cb-ok").await.unwrap();
    let _ = coordinator.run_job("cb-err").await.unwrap_err();

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_stats_and_upcoming_runs() {
    let coordinator = memory_coordinator();
    coordinator
        .schedule(
            "0 0 * * * *",
            job_handler(|| async { Ok(serde_json::json!(null)) }),
            JobSpec::named("hourly"),
        )
        .await
        .unwrap();
    coordinator.start().await.unwrap();
    coordinator.run_job("hourly").await.unwrap();

    let stats = coordinator.get_job_stats("hourly").await.unwrap();
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.successful_runs, 1);
    assert_eq!(stats.failed_runs, 0);
    assert!(stats.last_run.is_some());
    assert!(stats.next_run.is_some());

    let overall = coordinator.get_stats().await.unwrap();
    assert_eq!(overall.total_runs, 1);

    let upcoming = coordinator.get_upcoming_runs("hourly", 5).await.unwrap();
    assert_eq!(upcoming.len(), 5);
    assert!(upcoming.windows(2).all(|w| w[0] < w[1]));

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_reload_skips_jobs_without_handler() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/cronx.db", dir.path().display());

    // 模拟其他 Worker 写入的任务记录：本进程重载时看得到但没有处理函数
    {
        use cronx::{JobStore, SqliteJobStore};
        use cronx_testing_utils::JobBuilder;
        let store = SqliteJobStore::new(url.clone());
        store.connect().await.unwrap();
        let orphan = JobBuilder::new()
            .with_name("orphan")
            .with_schedule("* * * * * *")
            .build();
        store.save_job(&orphan).await.unwrap();
        store.disconnect().await.unwrap();
    }

    let second = Coordinator::new(CronxConfig::with_storage_url(&url)).unwrap();
    second.start().await.unwrap();
    assert!(second.get_job("orphan").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let runs = second.get_job_runs("orphan", None).await.unwrap();
    assert!(runs.is_empty(), "orphan 任务不应被布防执行");

    let err = second.run_job("orphan").await.unwrap_err();
    assert!(matches!(err, CronxError::InvalidConfiguration(_)));

    second.stop().await.unwrap();
}
