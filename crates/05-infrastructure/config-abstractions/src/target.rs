//! 重载动作承接方抽象接口

use crate::snapshot::EffectiveSnapshot;
use async_trait::async_trait;
use infrastructure_common::ConfigError;
use std::collections::BTreeSet;
use std::sync::Arc;

/// 重载目标 trait
///
/// 由消费快照的容器实现，负责进程内的实际重新绑定。
#[async_trait]
pub trait ReloadTarget: Send + Sync {
    /// 重新绑定声明前缀落在 `changed_prefixes` 中的配置对象
    async fn refresh(
        &self,
        changed_prefixes: &BTreeSet<String>,
        snapshot: Arc<EffectiveSnapshot>,
    ) -> Result<(), ConfigError>;

    /// 以新快照重建整个托管对象图，进程身份不变
    async fn restart_context(&self, snapshot: Arc<EffectiveSnapshot>) -> Result<(), ConfigError>;
}

/// 进程监管 trait
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// 请求终止当前进程
    async fn request_shutdown(&self, reason: &str) -> Result<(), ConfigError>;
}

/// 可刷新的配置绑定
pub trait RefreshableBinding: Send + Sync {
    /// 绑定名称
    fn name(&self) -> &str;

    /// 声明的键前缀
    fn prefix(&self) -> &str;

    /// 用新快照重新绑定
    fn rebind(&self, snapshot: &EffectiveSnapshot) -> Result<(), ConfigError>;
}

/// 上下文重建回调
#[async_trait]
pub trait ContextRestarter: Send + Sync {
    /// 重建上下文
    async fn restart(&self, snapshot: Arc<EffectiveSnapshot>) -> Result<(), ConfigError>;
}
