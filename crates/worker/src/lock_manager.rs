use std::sync::{Arc, Mutex};
use std::time::Duration;

use cronx_domain::JobStore;
use cronx_errors::CronxResult;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 单次执行期间的锁管理
///
/// 执行器为每次执行实例化一个 LockManager。处理函数运行期间由后台
/// 保活任务按固定间隔续期（间隔必须严格小于 TTL）。续期失败说明锁已
/// 过期并被其他 Worker 夺走——只记告警，不取消进行中的处理函数：
/// 两个 Worker 都可能写入执行记录，这是接受的结果竞争。
pub struct LockManager {
    store: Arc<dyn JobStore>,
    job_name: String,
    worker_id: String,
    ttl: Duration,
    extend_interval: Duration,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        job_name: impl Into<String>,
        worker_id: impl Into<String>,
        ttl: Duration,
        extend_interval: Duration,
    ) -> Self {
        debug_assert!(extend_interval < ttl);
        Self {
            store,
            job_name: job_name.into(),
            worker_id: worker_id.into(),
            ttl,
            extend_interval,
            keepalive: Mutex::new(None),
        }
    }

    /// 尝试获取锁；失败是正常结果而非错误
    pub async fn acquire(&self) -> CronxResult<bool> {
        let acquired = self
            .store
            .acquire_lock(&self.job_name, &self.worker_id, self.ttl)
            .await?;
        debug!(job = %self.job_name, worker = %self.worker_id, acquired, "锁获取");
        Ok(acquired)
    }

    /// 启动保活任务，按 `extend_interval` 周期续期
    pub fn start_keepalive(&self) {
        let store = Arc::clone(&self.store);
        let job_name = self.job_name.clone();
        let worker_id = self.worker_id.clone();
        let ttl = self.ttl;
        let extend_interval = self.extend_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(extend_interval);
            // interval 的第一跳立即到期，跳过它
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.extend_lock(&job_name, &worker_id, ttl).await {
                    Ok(true) => {
                        debug!(job = %job_name, worker = %worker_id, "锁已续期");
                    }
                    Ok(false) => {
                        warn!(
                            job = %job_name,
                            worker = %worker_id,
                            "锁所有权已丢失, 处理函数继续执行到本次结束"
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(job = %job_name, error = %e, "锁续期失败, 稍后重试");
                    }
                }
            }
        });
        *self.keepalive.lock().unwrap() = Some(handle);
    }

    /// 停止保活并释放锁；尽力而为且幂等
    pub async fn release(&self) {
        if let Some(handle) = self.keepalive.lock().unwrap().take() {
            handle.abort();
        }
        match self
            .store
            .release_lock(&self.job_name, &self.worker_id)
            .await
        {
            Ok(released) => {
                debug!(job = %self.job_name, released, "锁释放");
            }
            Err(e) => {
                warn!(job = %self.job_name, error = %e, "锁释放失败, 等待TTL过期");
            }
        }
    }
}
