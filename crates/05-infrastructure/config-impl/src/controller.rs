//! 配置重载控制器
//!
//! 负责启动时的首次解析（带重试），并按配置为每个监控类别启动监控任务。

use crate::dispatcher::{CancellationSupervisor, ReloadDispatcher};
use crate::event_handler::{LoggingReloadListener, ReloadListenerRegistry};
use crate::local_fs::LocalFileReader;
use crate::refresh_scope::RefreshScope;
use crate::resolver::ClusterSnapshotResolver;
use crate::store::{SnapshotRecord, SnapshotStore};
use crate::watcher::{
    ChangeWatcher, MountedPathTrigger, ResourceChangeTrigger, WatcherHandle, WatcherSettings,
};
use config_abstractions::{
    EffectiveSnapshot, FileReader, ProcessSupervisor, RefreshableBinding, ReloadListener,
    ReloadTarget, ResourceClient, SnapshotResolver, WatchClass, WatcherState,
};
use infrastructure_common::{ClusterConfigProperties, ConfigError, HealthStatus, ResourceKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 控制器构建器
pub struct ConfigReloadControllerBuilder {
    properties: ClusterConfigProperties,
    client: Option<Arc<dyn ResourceClient>>,
    file_reader: Option<Arc<dyn FileReader>>,
    target: Option<Arc<dyn ReloadTarget>>,
    supervisor: Option<Arc<dyn ProcessSupervisor>>,
    refresh_scope: Arc<RefreshScope>,
    listeners: Vec<Arc<dyn ReloadListener>>,
    shutdown: CancellationToken,
}

impl ConfigReloadControllerBuilder {
    /// 集群资源客户端（必需）
    pub fn with_client(mut self, client: Arc<dyn ResourceClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// 挂载文件读取器，默认读取本地文件系统
    pub fn with_file_reader(mut self, file_reader: Arc<dyn FileReader>) -> Self {
        self.file_reader = Some(file_reader);
        self
    }

    /// 重载目标，默认使用内置的刷新作用域
    pub fn with_target(mut self, target: Arc<dyn ReloadTarget>) -> Self {
        self.target = Some(target);
        self
    }

    /// 进程监管者，默认取消根令牌
    pub fn with_supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// 额外的重载监听器
    pub fn with_listener(mut self, listener: Arc<dyn ReloadListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// 使用外部提供的根令牌
    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 首次解析并启动监控
    pub async fn start(self) -> Result<RunningController, ConfigError> {
        self.properties.validate()?;

        let client = self
            .client
            .ok_or_else(|| ConfigError::configuration("未设置集群资源客户端"))?;
        let file_reader: Arc<dyn FileReader> = match self.file_reader {
            Some(file_reader) => file_reader,
            None => Arc::new(LocalFileReader::new()),
        };
        let target: Arc<dyn ReloadTarget> = match self.target {
            Some(target) => target,
            None => self.refresh_scope.clone() as Arc<dyn ReloadTarget>,
        };
        let supervisor: Arc<dyn ProcessSupervisor> = match self.supervisor {
            Some(supervisor) => supervisor,
            None => Arc::new(CancellationSupervisor::new(self.shutdown.clone())),
        };

        let properties = Arc::new(self.properties);
        let resolver = Arc::new(ClusterSnapshotResolver::new(
            properties.clone(),
            client.clone(),
            file_reader,
        )?);

        let initial = bootstrap(&properties, resolver.as_ref()).await?;
        self.refresh_scope.rebind_all(&initial)?;
        let store = Arc::new(SnapshotStore::new(initial, properties.reload.history_limit));

        let listeners = Arc::new(ReloadListenerRegistry::new());
        listeners.register(Arc::new(LoggingReloadListener::new())).await;
        for listener in self.listeners {
            listeners.register(listener).await;
        }

        let dispatcher = Arc::new(ReloadDispatcher::new(target, supervisor, listeners.clone()));

        let mut watchers = Vec::new();
        if properties.reload.enabled {
            let settings = WatcherSettings::from_properties(&properties.reload);
            for class in monitored_classes(&properties, &resolver) {
                let mut watcher = ChangeWatcher::new(
                    class,
                    settings.clone(),
                    resolver.clone(),
                    store.clone(),
                    dispatcher.clone(),
                    self.shutdown.clone(),
                );

                match class.resource_kind() {
                    Some(kind) => {
                        if let Some(plan) = resolver.plan(kind) {
                            let trigger = ResourceChangeTrigger::new(
                                client.clone(),
                                kind,
                                plan.watch_namespaces(),
                            )
                            .with_names(plan.watched_names());
                            watcher = watcher.with_trigger(Arc::new(trigger));
                        }
                    }
                    None => {
                        let trigger = MountedPathTrigger::new(resolver.mounted_paths());
                        watcher = watcher.with_trigger(Arc::new(trigger));
                    }
                }

                info!("启动 {} 监控", class);
                watchers.push(watcher.spawn());
            }
        } else {
            info!("配置重载未启用，只提供启动时快照");
        }

        Ok(RunningController {
            store,
            resolver,
            listeners,
            refresh_scope: self.refresh_scope,
            watchers,
            shutdown: self.shutdown,
        })
    }
}

/// 控制器入口
pub struct ConfigReloadController;

impl ConfigReloadController {
    /// 创建构建器
    pub fn builder(properties: ClusterConfigProperties) -> ConfigReloadControllerBuilder {
        ConfigReloadControllerBuilder {
            properties,
            client: None,
            file_reader: None,
            target: None,
            supervisor: None,
            refresh_scope: Arc::new(RefreshScope::new()),
            listeners: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// 首次解析，失败时按重试配置退避；全部失败后由 fail_fast 决定是否中止
async fn bootstrap(
    properties: &ClusterConfigProperties,
    resolver: &dyn SnapshotResolver,
) -> Result<EffectiveSnapshot, ConfigError> {
    let max_attempts = properties.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match resolver.resolve().await {
            Ok(snapshot) => {
                info!("启动快照解析完成: {} 个键（第 {} 次尝试）", snapshot.len(), attempt);
                return Ok(snapshot);
            }
            Err(e) if attempt < max_attempts && !e.is_parse_error() => {
                let delay = properties.retry.interval(attempt);
                warn!("启动快照解析失败（第 {} 次）: {}，{:?} 后重试", attempt, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                let fail_fast = ResourceKind::ALL
                    .iter()
                    .map(|kind| properties.kind(*kind))
                    .any(|kind| kind.enabled && kind.fail_fast);
                if fail_fast {
                    error!("启动快照解析失败，已启用 fail_fast: {}", e);
                    return Err(e);
                }
                warn!("启动快照解析失败，以空快照启动: {}", e);
                return Ok(EffectiveSnapshot::empty());
            }
        }
    }
}

fn monitored_classes(
    properties: &ClusterConfigProperties,
    resolver: &ClusterSnapshotResolver,
) -> Vec<WatchClass> {
    let reload = &properties.reload;
    let mut classes = Vec::new();

    if reload.monitor_config_maps && resolver.plan(ResourceKind::ConfigMap).is_some() {
        classes.push(WatchClass::ConfigMaps);
    }
    if reload.monitor_secrets && resolver.plan(ResourceKind::Secret).is_some() {
        classes.push(WatchClass::Secrets);
    }
    if reload.monitor_mounted_paths && properties.has_mounted_paths() {
        classes.push(WatchClass::MountedPaths);
    }
    classes
}

/// 运行中的控制器
pub struct RunningController {
    store: Arc<SnapshotStore>,
    resolver: Arc<ClusterSnapshotResolver>,
    listeners: Arc<ReloadListenerRegistry>,
    refresh_scope: Arc<RefreshScope>,
    watchers: Vec<WatcherHandle>,
    shutdown: CancellationToken,
}

impl RunningController {
    /// 当前有效快照
    pub fn current_snapshot(&self) -> Arc<EffectiveSnapshot> {
        self.store.current()
    }

    /// 当前快照版本
    pub fn snapshot_version(&self) -> u64 {
        self.store.version()
    }

    /// 快照替换历史
    pub fn history(&self) -> Vec<SnapshotRecord> {
        self.store.history()
    }

    /// 注册重载回调
    pub async fn on_reload(&self, listener: Arc<dyn ReloadListener>) {
        self.listeners.register(listener).await;
    }

    /// 注册可刷新绑定，并立即用当前快照绑定一次
    pub fn bind(&self, binding: Arc<dyn RefreshableBinding>) -> Result<(), ConfigError> {
        binding.rebind(&self.store.current())?;
        self.refresh_scope.register(binding);
        Ok(())
    }

    /// 内置刷新作用域
    pub fn refresh_scope(&self) -> &Arc<RefreshScope> {
        &self.refresh_scope
    }

    /// 快照解析器
    pub fn resolver(&self) -> &Arc<ClusterSnapshotResolver> {
        &self.resolver
    }

    /// 各监控类别的当前状态
    pub fn watcher_states(&self) -> Vec<(WatchClass, WatcherState)> {
        self.watchers
            .iter()
            .map(|watcher| (watcher.class(), watcher.state()))
            .collect()
    }

    /// 某个监控类别的句柄
    pub fn watcher(&self, class: WatchClass) -> Option<&WatcherHandle> {
        self.watchers.iter().find(|watcher| watcher.class() == class)
    }

    /// 汇总健康状态：取最差的一个
    pub fn health(&self) -> HealthStatus {
        let mut overall = HealthStatus::Healthy;
        for watcher in &self.watchers {
            let health = watcher.health();
            if health.is_unhealthy() {
                return health;
            }
            if health.is_degraded() && overall.is_healthy() {
                overall = health;
            }
        }
        overall
    }

    /// 根令牌，被取消即表示进程应当退出
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 停止所有监控并等待结束
    pub async fn shutdown(self) -> Result<(), ConfigError> {
        info!("停止配置重载控制器");
        self.shutdown.cancel();
        self.join().await
    }

    /// 等待所有监控任务结束，返回遇到的第一个错误
    pub async fn join(self) -> Result<(), ConfigError> {
        let mut first_error = None;
        for watcher in self.watchers {
            if let Err(e) = watcher.join().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
