//! 内存集群资源客户端
//!
//! 实现完整的 get / list / watch 契约，并支持故障注入，供测试与演示程序使用。

use async_trait::async_trait;
use config_abstractions::{ChangeType, ResourceClient, ResourceEvent, ResourceEventStream};
use futures::stream;
use infrastructure_common::{parse_label_selector, ConfigError, RawResource, ResourceKind};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Faults {
    failing_gets: u32,
    deny_get: bool,
    deny_watch: bool,
}

/// 内存集群资源客户端
pub struct InMemoryResourceClient {
    /// 以 `kind/namespace/name` 为键保存资源
    resources: RwLock<BTreeMap<String, RawResource>>,
    events: broadcast::Sender<ResourceEvent>,
    /// 当前订阅世代，关闭订阅时替换
    watch_epoch: Mutex<CancellationToken>,
    faults: Mutex<Faults>,
    get_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl InMemoryResourceClient {
    /// 创建空客户端
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            resources: RwLock::new(BTreeMap::new()),
            events,
            watch_epoch: Mutex::new(CancellationToken::new()),
            faults: Mutex::new(Faults::default()),
            get_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// 创建或更新资源，并向订阅者广播事件
    pub fn apply(&self, resource: RawResource) {
        let id = resource.source_id();
        let mut event = ResourceEvent::new(
            resource.kind,
            resource.name.clone(),
            resource.namespace.clone(),
            ChangeType::Created,
        );

        if self.resources.write().insert(id.clone(), resource).is_some() {
            event.change_type = ChangeType::Updated;
        }
        debug!("内存资源变更: {} {:?}", id, event.change_type);
        self.broadcast(event);
    }

    /// 删除资源，存在时广播删除事件
    pub fn remove(&self, kind: ResourceKind, name: &str, namespace: &str) -> Option<RawResource> {
        let id = format!("{}/{}/{}", kind, namespace, name);
        let removed = self.resources.write().remove(&id);
        if removed.is_some() {
            debug!("内存资源删除: {}", id);
            self.broadcast(ResourceEvent::new(kind, name, namespace, ChangeType::Deleted));
        }
        removed
    }

    /// 接下来 `count` 次 get 返回传输错误
    pub fn fail_next_get(&self, count: u32) {
        self.faults.lock().failing_gets = count;
    }

    /// 拒绝 get 与 list
    pub fn deny_get(&self, deny: bool) {
        self.faults.lock().deny_get = deny;
    }

    /// 拒绝新的订阅
    pub fn deny_watch(&self, deny: bool) {
        self.faults.lock().deny_watch = deny;
    }

    /// 断开所有现有订阅，之后的订阅不受影响
    pub fn close_watches(&self) {
        let mut epoch = self.watch_epoch.lock();
        epoch.cancel();
        *epoch = CancellationToken::new();
        warn!("内存客户端已断开所有订阅");
    }

    /// get 调用次数
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// list 调用次数
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// 当前活跃订阅数
    pub fn watcher_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn broadcast(&self, event: ResourceEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }

    fn check_read(&self, resource: &str) -> Result<(), ConfigError> {
        let mut faults = self.faults.lock();
        if faults.deny_get {
            return Err(ConfigError::authorization(resource, "读取被拒绝"));
        }
        if faults.failing_gets > 0 {
            faults.failing_gets -= 1;
            return Err(ConfigError::transport(resource, "模拟的传输故障"));
        }
        Ok(())
    }
}

impl Default for InMemoryResourceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceClient for InMemoryResourceClient {
    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<RawResource>, ConfigError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}/{}/{}", kind, namespace, name);
        self.check_read(&id)?;
        Ok(self.resources.read().get(&id).cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<RawResource>, ConfigError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_read(&format!("{}/{}", kind, namespace))?;

        let selector = parse_label_selector(label_selector);
        let mut matched: Vec<RawResource> = self
            .resources
            .read()
            .values()
            .filter(|resource| resource.kind == kind && resource.namespace == namespace)
            .filter(|resource| resource.matches_labels(&selector))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespaces: &[String],
    ) -> Result<ResourceEventStream, ConfigError> {
        if self.faults.lock().deny_watch {
            return Err(ConfigError::authorization(kind.as_str(), "订阅被拒绝"));
        }

        let receiver = self.events.subscribe();
        let closed = self.watch_epoch.lock().clone();
        let namespaces = namespaces.to_vec();

        let stream = stream::unfold(
            (receiver, closed, namespaces),
            move |(mut receiver, closed, namespaces)| async move {
                loop {
                    let next = tokio::select! {
                        _ = closed.cancelled() => return None,
                        next = receiver.recv() => next,
                    };
                    match next {
                        Ok(event) => {
                            if event.kind == kind && namespaces.contains(&event.namespace) {
                                return Some((Ok(event), (receiver, closed, namespaces)));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            let error = ConfigError::watch(format!("订阅落后，丢失 {} 个事件", skipped));
                            return Some((Err(error), (receiver, closed, namespaces)));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn config_map(name: &str, namespace: &str) -> RawResource {
        RawResource::new(ResourceKind::ConfigMap, name, namespace).with_entry("k", b"v".to_vec())
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        let client = InMemoryResourceClient::new();
        client.apply(config_map("app", "default"));

        let found = client
            .get(ResourceKind::ConfigMap, "app", "default")
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(client
            .get(ResourceKind::Secret, "app", "default")
            .await
            .unwrap()
            .is_none());

        assert!(client.remove(ResourceKind::ConfigMap, "app", "default").is_some());
        assert!(client
            .get(ResourceKind::ConfigMap, "app", "default")
            .await
            .unwrap()
            .is_none());
        assert_eq!(client.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_list_filters_by_labels_sorted_by_name() {
        let client = InMemoryResourceClient::new();
        client.apply(config_map("zeta", "default").with_label("team", "orders"));
        client.apply(config_map("alpha", "default").with_label("team", "orders"));
        client.apply(config_map("other", "default").with_label("team", "billing"));
        client.apply(config_map("remote", "elsewhere").with_label("team", "orders"));

        let listed = client
            .list(ResourceKind::ConfigMap, "default", "team=orders")
            .await
            .unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let client = InMemoryResourceClient::new();
        client.fail_next_get(1);
        let error = client
            .get(ResourceKind::ConfigMap, "app", "default")
            .await
            .unwrap_err();
        assert!(error.is_retryable());
        assert!(client
            .get(ResourceKind::ConfigMap, "app", "default")
            .await
            .is_ok());

        client.deny_get(true);
        let error = client
            .list(ResourceKind::ConfigMap, "default", "")
            .await
            .unwrap_err();
        assert!(error.is_authorization());

        client.deny_watch(true);
        assert!(client
            .watch(ResourceKind::ConfigMap, &["default".to_string()])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_watch_filters_and_closes() {
        let client = InMemoryResourceClient::new();
        let mut stream = client
            .watch(ResourceKind::ConfigMap, &["default".to_string()])
            .await
            .unwrap();

        client.apply(config_map("ignored", "elsewhere"));
        client.apply(RawResource::new(ResourceKind::Secret, "ignored", "default"));
        client.apply(config_map("app", "default"));
        client.apply(config_map("app", "default"));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.name, "app");
        assert_eq!(first.change_type, ChangeType::Created);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.change_type, ChangeType::Updated);

        client.close_watches();
        assert!(stream.next().await.is_none());
    }
}
