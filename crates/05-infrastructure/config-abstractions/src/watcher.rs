//! 变更监控抽象接口

use crate::client::ChangeType;
use crate::snapshot::EffectiveSnapshot;
use async_trait::async_trait;
use futures::stream::BoxStream;
use infrastructure_common::{ConfigError, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 监控类别
///
/// 每个类别一个独立的监控任务，可单独启停。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchClass {
    /// ConfigMap
    ConfigMaps,
    /// Secret
    Secrets,
    /// 挂载路径
    MountedPaths,
}

impl WatchClass {
    /// 对应的资源类型
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            Self::ConfigMaps => Some(ResourceKind::ConfigMap),
            Self::Secrets => Some(ResourceKind::Secret),
            Self::MountedPaths => None,
        }
    }

    /// 由资源类型得到监控类别
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::ConfigMap => Self::ConfigMaps,
            ResourceKind::Secret => Self::Secrets,
        }
    }
}

impl fmt::Display for WatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigMaps => "configmaps",
            Self::Secrets => "secrets",
            Self::MountedPaths => "mounted-paths",
        };
        f.write_str(name)
    }
}

/// 监控器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatcherState {
    /// 尚未开始
    Idle,
    /// 已订阅，等待事件
    Watching,
    /// 合并窗口内
    Debouncing,
    /// 正在解析快照
    Resolving,
    /// 轮询间隔内
    Sleeping,
    /// 监控被禁用
    Disabled,
    /// 已停止
    Stopped,
}

/// 变更通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    /// 来源类别
    pub class: WatchClass,
    /// 资源或路径标识
    pub resource: String,
    /// 变更类型
    pub change_type: ChangeType,
}

impl ChangeNotice {
    /// 创建新的变更通知
    pub fn new(class: WatchClass, resource: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            class,
            resource: resource.into(),
            change_type,
        }
    }
}

/// 变更通知流
pub type ChangeStream = BoxStream<'static, Result<ChangeNotice, ConfigError>>;

/// 变更触发源 trait
///
/// 事件模式下监控器从这里订阅通知。
#[async_trait]
pub trait ChangeTrigger: Send + Sync {
    /// 建立订阅
    async fn subscribe(&self) -> Result<ChangeStream, ConfigError>;
}

/// 快照解析 trait
///
/// 执行一次完整的 定位 -> 归一化 -> 合并，产出候选快照。
#[async_trait]
pub trait SnapshotResolver: Send + Sync {
    /// 解析候选快照
    async fn resolve(&self) -> Result<EffectiveSnapshot, ConfigError>;
}
