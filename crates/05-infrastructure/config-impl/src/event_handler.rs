//! 重载监听器注册与分发

use config_abstractions::events::{ReloadEvent, ReloadEventType, ReloadListener};
use config_abstractions::SnapshotDiff;
use infrastructure_common::{ConfigError, ReloadStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 重载监听器注册表
///
/// 按名称保存监听器，分发顺序为名称字典序。
pub struct ReloadListenerRegistry {
    listeners: Arc<RwLock<BTreeMap<String, Arc<dyn ReloadListener>>>>,
}

impl ReloadListenerRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// 注册监听器，同名监听器被替换
    pub async fn register(&self, listener: Arc<dyn ReloadListener>) {
        info!("注册重载监听器: {}", listener.name());

        let mut listeners = self.listeners.write().await;
        listeners.insert(listener.name().to_string(), listener);
    }

    /// 移除监听器
    pub async fn unregister(&self, listener_name: &str) -> Result<(), ConfigError> {
        info!("移除重载监听器: {}", listener_name);

        let mut listeners = self.listeners.write().await;
        if listeners.remove(listener_name).is_some() {
            Ok(())
        } else {
            Err(ConfigError::configuration(format!(
                "重载监听器不存在: {}",
                listener_name
            )))
        }
    }

    /// 分发成功后通知所有监听器
    pub async fn notify_reload(&self, strategy: ReloadStrategy, diff: &SnapshotDiff) {
        let listeners = self.listeners.read().await;

        for (name, listener) in listeners.iter() {
            if !listener.is_enabled() {
                continue;
            }
            debug!("向监听器 {} 分发重载通知: {}", name, strategy.as_str());
            listener.on_reload(strategy, diff);
        }
    }

    /// 分发生命周期事件
    pub async fn notify_event(&self, event: &ReloadEvent) {
        let listeners = self.listeners.read().await;

        for (name, listener) in listeners.iter() {
            if !listener.is_enabled() {
                continue;
            }
            debug!("向监听器 {} 分发事件: {:?}", name, event.event_type);
            listener.on_event(event);
        }
    }

    /// 获取监听器数量
    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// 获取所有监听器名称
    pub async fn listener_names(&self) -> Vec<String> {
        self.listeners.read().await.keys().cloned().collect()
    }
}

impl Default for ReloadListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 日志记录监听器
///
/// 将重载通知与生命周期事件记录到日志中
pub struct LoggingReloadListener {
    name: String,
    enabled: bool,
}

impl LoggingReloadListener {
    /// 创建新的日志记录监听器
    pub fn new() -> Self {
        Self {
            name: "LoggingReloadListener".to_string(),
            enabled: true,
        }
    }

    /// 设置是否启用
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Default for LoggingReloadListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadListener for LoggingReloadListener {
    fn on_reload(&self, strategy: ReloadStrategy, diff: &SnapshotDiff) {
        info!(
            "配置已重载 ({}): 新增 {}，删除 {}，修改 {}",
            strategy.as_str(),
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        );
        debug!("变化的键: {:?}", diff.changed_keys());
    }

    fn on_event(&self, event: &ReloadEvent) {
        match event.event_type {
            ReloadEventType::WatchStarted => {
                info!("[{}] 监控已启动: {} at {}", event.class, event.message, event.timestamp);
            }
            ReloadEventType::WatchDegraded => {
                warn!("[{}] 事件监控退化为轮询: {} at {}", event.class, event.message, event.timestamp);
            }
            ReloadEventType::MonitoringDisabled => {
                error!("[{}] 监控已禁用: {} at {}", event.class, event.message, event.timestamp);
            }
            ReloadEventType::CycleFailed => {
                warn!("[{}] 解析周期失败: {} at {}", event.class, event.message, event.timestamp);
            }
            ReloadEventType::SnapshotApplied => {
                info!("[{}] {} at {}", event.class, event.message, event.timestamp);
            }
            ReloadEventType::WatchStopped => {
                info!("[{}] 监控已停止 at {}", event.class, event.timestamp);
            }
        }

        if !event.metadata.is_empty() {
            debug!("事件元数据: {:?}", event.metadata);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
