//! 集群资源 API 抽象接口

use async_trait::async_trait;
use futures::stream::BoxStream;
use infrastructure_common::{ConfigError, RawResource, ResourceKind};
use serde::{Deserialize, Serialize};

/// 资源变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// 资源创建
    Created,
    /// 资源更新
    Updated,
    /// 资源删除
    Deleted,
}

/// 资源变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    /// 资源类型
    pub kind: ResourceKind,
    /// 资源名称
    pub name: String,
    /// 命名空间
    pub namespace: String,
    /// 变更类型
    pub change_type: ChangeType,
}

impl ResourceEvent {
    /// 创建新的资源事件
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        change_type: ChangeType,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            change_type,
        }
    }

    /// 资源标识
    pub fn resource_id(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// 资源事件流
///
/// 流结束表示订阅被断开；丢弃流即释放订阅。
pub type ResourceEventStream = BoxStream<'static, Result<ResourceEvent, ConfigError>>;

/// 集群资源客户端 trait
///
/// 传输与认证由实现方负责，这里只约定三类原语。
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// 读取单个资源，不存在时返回 `None`
    ///
    /// 实现也可以用 [`ConfigError::NotFound`] 报告缺失，调用方同样按缺失处理。
    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<RawResource>, ConfigError>;

    /// 按标签选择器列出资源
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<RawResource>, ConfigError>;

    /// 订阅指定命名空间内某类资源的变更
    async fn watch(
        &self,
        kind: ResourceKind,
        namespaces: &[String],
    ) -> Result<ResourceEventStream, ConfigError>;
}
