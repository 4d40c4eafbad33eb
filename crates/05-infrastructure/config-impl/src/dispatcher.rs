//! 重载分发

use crate::event_handler::ReloadListenerRegistry;
use async_trait::async_trait;
use config_abstractions::{EffectiveSnapshot, ProcessSupervisor, ReloadTarget, SnapshotDiff};
use infrastructure_common::{ConfigError, ReloadStrategy};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 重载分发器
///
/// 按策略调用外部协作者，成功后通知监听器。分发完成（或失败）后才返回，
/// 调用方据此保证同一类别的重载周期不会重叠。
pub struct ReloadDispatcher {
    target: Arc<dyn ReloadTarget>,
    supervisor: Arc<dyn ProcessSupervisor>,
    listeners: Arc<ReloadListenerRegistry>,
}

impl ReloadDispatcher {
    /// 创建分发器
    pub fn new(
        target: Arc<dyn ReloadTarget>,
        supervisor: Arc<dyn ProcessSupervisor>,
        listeners: Arc<ReloadListenerRegistry>,
    ) -> Self {
        Self {
            target,
            supervisor,
            listeners,
        }
    }

    /// 监听器注册表
    pub fn listeners(&self) -> &Arc<ReloadListenerRegistry> {
        &self.listeners
    }

    /// 分发一次变更
    pub async fn dispatch(
        &self,
        strategy: ReloadStrategy,
        diff: &SnapshotDiff,
        snapshot: Arc<EffectiveSnapshot>,
    ) -> Result<(), ConfigError> {
        info!("分发配置变更: 策略 {}，{} 个键", strategy.as_str(), diff.len());

        match strategy {
            ReloadStrategy::Refresh => {
                let prefixes = diff.changed_prefixes();
                self.target.refresh(&prefixes, snapshot).await?;
            }
            ReloadStrategy::RestartContext => {
                self.target.restart_context(snapshot).await?;
            }
            ReloadStrategy::Shutdown => {
                let reason = format!("配置发生变化（{} 个键），请求重启进程", diff.len());
                warn!("{}", reason);
                self.supervisor
                    .request_shutdown(&reason)
                    .await
                    .map_err(|e| {
                        error!("进程终止请求失败: {}", e);
                        ConfigError::ShutdownFailed {
                            message: e.to_string(),
                        }
                    })?;
            }
        }

        self.listeners.notify_reload(strategy, diff).await;
        Ok(())
    }
}

/// 基于取消令牌的进程监管
///
/// 请求终止时取消根令牌，宿主进程据此退出，由外部监管者负责拉起。
pub struct CancellationSupervisor {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl CancellationSupervisor {
    /// 创建监管者
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Mutex::new(None),
        }
    }

    /// 终止原因
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// 是否已请求终止
    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[async_trait]
impl ProcessSupervisor for CancellationSupervisor {
    async fn request_shutdown(&self, reason: &str) -> Result<(), ConfigError> {
        info!("请求终止进程: {}", reason);
        self.reason.lock().get_or_insert_with(|| reason.to_string());
        self.token.cancel();
        Ok(())
    }
}
