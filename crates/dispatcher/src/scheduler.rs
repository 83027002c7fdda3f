use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronx_domain::{Job, Timezone};
use cronx_errors::CronxResult;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cron_utils::CronSchedule;

/// 到点回调：调度器把任务快照交给它，执行在调用方自己的任务上进行，
/// 回调必须立即返回，不得阻塞定时循环。
pub type FireCallback = Arc<dyn Fn(Job) + Send + Sync>;

/// 单次 sleep 的上限，醒来后重新核对目标时刻
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(3600);

/// 每任务定时器调度器
///
/// 为每个活跃任务维护一个一次性定时任务：计算下一次触发时刻、睡到点、
/// 把任务快照交给执行回调、立刻重新布防。暂停的任务保持布防，
/// 短路由执行器完成。触发时刻落在过去时立即触发一次，之后从当前时间
/// 重新计算——长时间停顿后每个错过的槽位最多补触发一次，不会连环爆发。
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    jobs: Mutex<HashMap<String, ArmedJob>>,
    on_fire: FireCallback,
    timezone: Timezone,
    running: AtomicBool,
}

struct ArmedJob {
    job: Job,
    timer: Option<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new(timezone: Timezone, on_fire: FireCallback) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                on_fire,
                timezone,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// 启动调度器并为已有任务布防
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.inner.jobs.lock().unwrap();
        let names: Vec<String> = jobs
            .iter()
            .filter(|(_, armed)| armed.timer.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            let timer = spawn_timer(&self.inner, name.clone());
            if let Some(armed) = jobs.get_mut(&name) {
                armed.timer = Some(timer);
            }
        }
        info!("调度器已启动, 任务数: {}", jobs.len());
    }

    /// 停止调度器，取消全部定时器；已交给执行器的任务继续运行
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.inner.jobs.lock().unwrap();
        for (_, armed) in jobs.drain() {
            if let Some(timer) = armed.timer {
                timer.abort();
            }
        }
        info!("调度器已停止");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 加入任务；调度器运行中时与加入动作一并布防。
    /// 同名任务被替换，旧定时器立即取消。返回计算出的下一次触发时刻。
    pub fn add_job(&self, mut job: Job) -> CronxResult<Option<DateTime<Utc>>> {
        let schedule = CronSchedule::new(&job.schedule)?;
        let next = schedule.next_after(Utc::now(), self.inner.timezone);
        job.next_run = next;

        let mut jobs = self.inner.jobs.lock().unwrap();
        if let Some(old) = jobs.remove(&job.name) {
            if let Some(timer) = old.timer {
                timer.abort();
            }
        }
        let name = job.name.clone();
        let timer = if self.inner.running.load(Ordering::SeqCst) {
            Some(spawn_timer(&self.inner, name.clone()))
        } else {
            None
        };
        jobs.insert(name.clone(), ArmedJob { job, timer });
        debug!(job = %name, next = ?next, "任务已布防");
        Ok(next)
    }

    /// 移除任务并立即取消其定时器
    pub fn remove_job(&self, name: &str) -> bool {
        let mut jobs = self.inner.jobs.lock().unwrap();
        match jobs.remove(name) {
            Some(armed) => {
                if let Some(timer) = armed.timer {
                    timer.abort();
                }
                debug!(job = %name, "任务已撤防");
                true
            }
            None => false,
        }
    }

    /// 更新调度器持有的暂停标记；定时器不受影响
    pub fn set_paused(&self, name: &str, paused: bool) -> bool {
        let mut jobs = self.inner.jobs.lock().unwrap();
        match jobs.get_mut(name) {
            Some(armed) => {
                armed.job.is_paused = paused;
                armed.job.touch();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.jobs.lock().unwrap().contains_key(name)
    }

    /// 调度器内部持有的任务快照
    pub fn get_job(&self, name: &str) -> Option<Job> {
        self.inner
            .jobs
            .lock()
            .unwrap()
            .get(name)
            .map(|armed| armed.job.clone())
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.lock().unwrap().len()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 定时循环：计算下一次触发、睡到点、触发、重新布防。
/// 通过 Weak 引用观察调度器，调度器被回收或任务被移除时自行退出。
fn spawn_timer(inner: &Arc<SchedulerInner>, name: String) -> JoinHandle<()> {
    let weak: Weak<SchedulerInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        loop {
            let next = {
                let Some(inner) = weak.upgrade() else { break };
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                let schedule_expr = {
                    let jobs = inner.jobs.lock().unwrap();
                    match jobs.get(&name) {
                        Some(armed) => armed.job.schedule.clone(),
                        None => break,
                    }
                };
                let schedule = match CronSchedule::new(&schedule_expr) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        error!(job = %name, error = %e, "任务表达式无法解析, 撤防");
                        break;
                    }
                };
                let Some(next) = schedule.next_after(Utc::now(), inner.timezone) else {
                    warn!(job = %name, "表达式不再产生触发时刻, 撤防");
                    break;
                };
                let mut jobs = inner.jobs.lock().unwrap();
                match jobs.get_mut(&name) {
                    // next_run 只更新内存副本，权威触发时刻始终由表达式重算
                    Some(armed) => armed.job.next_run = Some(next),
                    None => break,
                }
                next
            };

            // 分段睡眠，醒来后核对目标时刻；落在过去时立即触发
            loop {
                let remaining = next - Utc::now();
                if remaining <= chrono::Duration::zero() {
                    break;
                }
                let chunk = remaining
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_SLEEP_CHUNK);
                tokio::time::sleep(chunk).await;
            }

            let Some(inner) = weak.upgrade() else { break };
            if !inner.running.load(Ordering::SeqCst) {
                break;
            }
            let snapshot = {
                let mut jobs = inner.jobs.lock().unwrap();
                match jobs.get_mut(&name) {
                    Some(armed) => {
                        armed.job.last_run = Some(Utc::now());
                        armed.job.clone()
                    }
                    None => break,
                }
            };
            (inner.on_fire)(snapshot);
            // 回到循环顶部：立即重算下一次触发并重新布防
        }
    })
}
