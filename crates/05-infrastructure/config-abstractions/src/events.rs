//! 重载事件与监听器定义

use crate::snapshot::SnapshotDiff;
use crate::watcher::WatchClass;
use infrastructure_common::ReloadStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 重载生命周期事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadEvent {
    /// 事件类型
    pub event_type: ReloadEventType,
    /// 事件来源的监控类别
    pub class: WatchClass,
    /// 描述信息
    pub message: String,
    /// 事件时间
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// 额外元数据
    pub metadata: HashMap<String, String>,
}

impl ReloadEvent {
    fn new(event_type: ReloadEventType, class: WatchClass, message: impl Into<String>) -> Self {
        Self {
            event_type,
            class,
            message: message.into(),
            timestamp: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// 监控已启动
    pub fn watch_started(class: WatchClass, message: impl Into<String>) -> Self {
        Self::new(ReloadEventType::WatchStarted, class, message)
    }

    /// 事件订阅失效，退化为轮询
    pub fn watch_degraded(class: WatchClass, reason: impl Into<String>) -> Self {
        Self::new(ReloadEventType::WatchDegraded, class, reason)
    }

    /// 轮询同样被拒绝，停止监控
    pub fn monitoring_disabled(class: WatchClass, reason: impl Into<String>) -> Self {
        Self::new(ReloadEventType::MonitoringDisabled, class, reason)
    }

    /// 解析周期失败
    pub fn cycle_failed(class: WatchClass, reason: impl Into<String>) -> Self {
        Self::new(ReloadEventType::CycleFailed, class, reason)
    }

    /// 新快照已生效
    pub fn snapshot_applied(class: WatchClass, version: u64, changed: usize) -> Self {
        Self::new(
            ReloadEventType::SnapshotApplied,
            class,
            format!("快照版本 {} 已生效，变化 {} 个键", version, changed),
        )
        .with_metadata("version", version.to_string())
    }

    /// 监控已停止
    pub fn watch_stopped(class: WatchClass) -> Self {
        Self::new(ReloadEventType::WatchStopped, class, "监控已停止")
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 重载事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReloadEventType {
    /// 监控启动
    WatchStarted,
    /// 事件模式退化为轮询
    WatchDegraded,
    /// 监控被禁用
    MonitoringDisabled,
    /// 解析周期失败
    CycleFailed,
    /// 快照生效
    SnapshotApplied,
    /// 监控停止
    WatchStopped,
}

/// 重载监听器 trait
///
/// 回调在监控任务内同步执行，实现方不应阻塞。
pub trait ReloadListener: Send + Sync {
    /// 分发成功后回调
    fn on_reload(&self, strategy: ReloadStrategy, diff: &SnapshotDiff);

    /// 处理生命周期事件
    fn on_event(&self, _event: &ReloadEvent) {}

    /// 获取监听器名称
    fn name(&self) -> &str;

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }
}
