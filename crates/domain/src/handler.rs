use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::entities::JobRun;

/// 处理函数返回的 future
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>;

/// 任务处理函数，进程内可调用对象，不参与持久化
pub type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// 成功/失败回调，失败只记日志，永不影响任务状态
pub type JobCallback = Arc<dyn Fn(&JobRun) -> anyhow::Result<()> + Send + Sync>;

/// 某个任务名下注册的全部进程内可调用对象
#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: JobHandler,
    pub on_success: Option<JobCallback>,
    pub on_error: Option<JobCallback>,
}

impl HandlerEntry {
    pub fn new(handler: JobHandler) -> Self {
        Self {
            handler,
            on_success: None,
            on_error: None,
        }
    }
}

/// 按任务名索引的处理函数注册表
///
/// 存储里的 Job 记录可能来自其他 Worker，本进程没有对应的处理函数；
/// 重载时只为注册表里有条目的任务布置定时器。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HashMap<String, HandlerEntry>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, entry: HandlerEntry) {
        self.inner.lock().unwrap().insert(name.into(), entry);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner.lock().unwrap().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<HandlerEntry> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().unwrap().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// 把一个返回 future 的闭包包装成 `JobHandler`
pub fn job_handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_round_trip() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        let handler = job_handler(|| async { Ok(serde_json::json!({"ok": true})) });
        registry.register("hb", HandlerEntry::new(handler));

        assert!(registry.contains("hb"));
        assert_eq!(registry.len(), 1);

        let entry = registry.get("hb").unwrap();
        let value = (entry.handler)().await.unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));

        assert!(registry.remove("hb"));
        assert!(!registry.remove("hb"));
        assert!(!registry.contains("hb"));
    }
}
