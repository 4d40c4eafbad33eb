//! 变更监控器实现
//!
//! 每个监控类别一个长期任务。事件模式订阅变更流并做尾沿防抖；
//! 轮询模式按周期无条件解析。两种模式都在解析后与存储的快照做深比较，
//! 只有不同才分发重载并替换快照。

use crate::dispatcher::ReloadDispatcher;
use crate::event_handler::ReloadListenerRegistry;
use crate::store::SnapshotStore;
use async_trait::async_trait;
use config_abstractions::{
    ChangeNotice, ChangeStream, ChangeTrigger, ChangeType, ReloadEvent, ResourceClient,
    SnapshotResolver, WatchClass, WatcherState,
};
use futures::{stream, StreamExt};
use infrastructure_common::{
    ConfigError, HealthStatus, ReloadProperties, ReloadStrategy, ResourceKind, WatchMode,
};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 监控参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    /// 监控模式
    pub mode: WatchMode,
    /// 重载策略
    pub strategy: ReloadStrategy,
    /// 轮询周期
    pub period: Duration,
    /// 防抖窗口
    pub debounce: Duration,
    /// 失败重试的最大间隔
    pub max_backoff: Duration,
}

impl WatcherSettings {
    /// 从重载配置生成
    pub fn from_properties(properties: &ReloadProperties) -> Self {
        Self {
            mode: properties.mode,
            strategy: properties.strategy,
            period: properties.period(),
            debounce: properties.debounce(),
            max_backoff: properties.max_backoff(),
        }
    }
}

/// 指数退避
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// 创建退避器，上限不低于基础间隔
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// 下一次重试间隔：`base * 2^failures`，不超过上限
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures.min(16));
        self.failures = self.failures.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// 成功后复位
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// 连续失败次数
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// 一次解析周期的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 快照未变化，未分发
    Unchanged,
    /// 新快照已生效
    Applied {
        /// 新版本号
        version: u64,
        /// 变化的键数
        changed: usize,
    },
}

/// 监控循环的退出原因
enum LoopExit {
    Cancelled,
    Degrade(String),
    Disable(String),
}

/// 防抖窗口的结束方式
enum DebounceOutcome {
    Settled(usize),
    Cancelled,
    StreamLost(String),
}

/// 变更监控器
pub struct ChangeWatcher {
    class: WatchClass,
    settings: WatcherSettings,
    resolver: Arc<dyn SnapshotResolver>,
    trigger: Option<Arc<dyn ChangeTrigger>>,
    store: Arc<SnapshotStore>,
    dispatcher: Arc<ReloadDispatcher>,
    listeners: Arc<ReloadListenerRegistry>,
    state: watch::Sender<WatcherState>,
    health: watch::Sender<HealthStatus>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl ChangeWatcher {
    /// 创建监控器
    ///
    /// `shutdown` 是进程级根令牌：它被取消时监控器停止；
    /// 终止策略失败这类致命错误也会取消它。
    pub fn new(
        class: WatchClass,
        settings: WatcherSettings,
        resolver: Arc<dyn SnapshotResolver>,
        store: Arc<SnapshotStore>,
        dispatcher: Arc<ReloadDispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Idle);
        let (health, _) = watch::channel(HealthStatus::Healthy);
        let listeners = dispatcher.listeners().clone();

        Self {
            class,
            settings,
            resolver,
            trigger: None,
            store,
            dispatcher,
            listeners,
            state,
            health,
            cancel: shutdown.child_token(),
            shutdown,
        }
    }

    /// 设置事件模式的触发源；未设置时只能轮询
    pub fn with_trigger(mut self, trigger: Arc<dyn ChangeTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// 启动监控任务
    pub fn spawn(self) -> WatcherHandle {
        let class = self.class;
        let state = self.state.subscribe();
        let health = self.health.subscribe();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());

        WatcherHandle {
            class,
            state,
            health,
            cancel,
            task: Some(task),
        }
    }

    /// 监控主循环，直到被取消、被禁用或遇到致命错误
    pub async fn run(self) -> Result<(), ConfigError> {
        info!("[{}] 启动配置监控，模式 {:?}", self.class, self.settings.mode);

        let mut exit = match (&self.trigger, self.settings.mode) {
            (Some(trigger), WatchMode::Event) => self.run_event_mode(trigger.clone()).await,
            _ => self.run_polling_mode(false).await,
        };

        if let Ok(LoopExit::Degrade(reason)) = &exit {
            warn!("[{}] 事件监控失效，退化为轮询: {}", self.class, reason);
            self.health.send_replace(HealthStatus::degraded(format!("已退化为轮询: {}", reason)));
            self.listeners
                .notify_event(&ReloadEvent::watch_degraded(self.class, reason.clone()))
                .await;
            exit = self.run_polling_mode(true).await;
        }

        match exit {
            Ok(LoopExit::Disable(reason)) => {
                error!("[{}] 轮询同样被拒绝，停止监控: {}", self.class, reason);
                self.set_state(WatcherState::Disabled);
                self.health.send_replace(HealthStatus::unhealthy(reason.clone()));
                self.listeners
                    .notify_event(&ReloadEvent::monitoring_disabled(self.class, reason))
                    .await;
                Ok(())
            }
            Ok(_) => {
                info!("[{}] 配置监控已停止", self.class);
                self.set_state(WatcherState::Stopped);
                self.listeners
                    .notify_event(&ReloadEvent::watch_stopped(self.class))
                    .await;
                Ok(())
            }
            Err(e) => {
                error!("[{}] 配置监控遇到致命错误: {}", self.class, e);
                self.set_state(WatcherState::Stopped);
                self.health.send_replace(HealthStatus::unhealthy(e.to_string()));
                self.shutdown.cancel();
                Err(e)
            }
        }
    }

    async fn run_event_mode(&self, trigger: Arc<dyn ChangeTrigger>) -> Result<LoopExit, ConfigError> {
        let mut changes = match trigger.subscribe().await {
            Ok(changes) => changes,
            Err(e) => return Ok(LoopExit::Degrade(e.to_string())),
        };

        self.set_state(WatcherState::Watching);
        self.health.send_replace(HealthStatus::Healthy);
        self.listeners
            .notify_event(&ReloadEvent::watch_started(self.class, "事件模式"))
            .await;

        let mut backoff = Backoff::new(self.settings.debounce, self.settings.max_backoff);
        let mut retry_at: Option<Instant> = None;

        loop {
            let retry = async move {
                match retry_at {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(LoopExit::Cancelled),
                _ = retry => {
                    debug!("[{}] 重试上次失败的解析周期", self.class);
                }
                next = changes.next() => match next {
                    Some(Ok(notice)) => {
                        debug!("[{}] 收到变更通知: {} {:?}", self.class, notice.resource, notice.change_type);
                        match self.debounce(&mut changes).await {
                            DebounceOutcome::Settled(coalesced) => {
                                debug!("[{}] 防抖窗口结束，合并 {} 个通知", self.class, coalesced);
                            }
                            DebounceOutcome::Cancelled => return Ok(LoopExit::Cancelled),
                            DebounceOutcome::StreamLost(reason) => return Ok(LoopExit::Degrade(reason)),
                        }
                    }
                    Some(Err(e)) => return Ok(LoopExit::Degrade(e.to_string())),
                    None => return Ok(LoopExit::Degrade("变更流已关闭".to_string())),
                }
            }

            retry_at = None;
            match self.run_cycle().await {
                Ok(_) => backoff.reset(),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_authorization() => return Ok(LoopExit::Degrade(e.to_string())),
                Err(_) => {
                    let delay = backoff.next_delay();
                    debug!("[{}] {:?} 后重试", self.class, delay);
                    retry_at = Some(Instant::now() + delay);
                }
            }
            self.set_state(WatcherState::Watching);
        }
    }

    /// 尾沿防抖：窗口内每到一个通知就重新计时
    async fn debounce(&self, changes: &mut ChangeStream) -> DebounceOutcome {
        self.set_state(WatcherState::Debouncing);
        let mut coalesced = 1;
        let mut deadline = Instant::now() + self.settings.debounce;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return DebounceOutcome::Cancelled,
                _ = sleep_until(deadline) => return DebounceOutcome::Settled(coalesced),
                next = changes.next() => match next {
                    Some(Ok(_)) => {
                        coalesced += 1;
                        deadline = Instant::now() + self.settings.debounce;
                    }
                    Some(Err(e)) => return DebounceOutcome::StreamLost(e.to_string()),
                    None => return DebounceOutcome::StreamLost("变更流已关闭".to_string()),
                }
            }
        }
    }

    /// 轮询循环；`immediate` 为真时先立即解析一次（用于退化后补上丢失的变更）
    async fn run_polling_mode(&self, immediate: bool) -> Result<LoopExit, ConfigError> {
        if !immediate {
            self.health.send_replace(HealthStatus::Healthy);
            self.listeners
                .notify_event(&ReloadEvent::watch_started(self.class, "轮询模式"))
                .await;
        }

        let mut backoff = Backoff::new(self.settings.period, self.settings.max_backoff);
        let mut delay = if immediate {
            Duration::ZERO
        } else {
            self.settings.period
        };

        loop {
            self.set_state(WatcherState::Sleeping);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(LoopExit::Cancelled),
                _ = sleep(delay) => {}
            }

            match self.run_cycle().await {
                Ok(_) => {
                    backoff.reset();
                    delay = self.settings.period;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_authorization() => return Ok(LoopExit::Disable(e.to_string())),
                Err(_) => {
                    delay = backoff.next_delay();
                    debug!("[{}] {:?} 后重试", self.class, delay);
                }
            }
        }
    }

    /// 一次解析周期：解析、比较、分发、提交
    ///
    /// 整个周期都持有存储事务，多个类别的周期串行执行，
    /// 后提交的快照总是在先提交的快照生效之后解析出来的。
    /// 分发失败时快照保持不变，下一个周期会重新检测到同一变化。
    pub async fn run_cycle(&self) -> Result<CycleOutcome, ConfigError> {
        let cycle_id = Uuid::new_v4();
        self.set_state(WatcherState::Resolving);
        let transaction = self.store.begin().await;
        debug!(%cycle_id, "[{}] 开始解析周期", self.class);

        let candidate = match self.resolver.resolve().await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(%cycle_id, "[{}] 解析失败，保留当前快照: {}", self.class, e);
                self.listeners
                    .notify_event(&ReloadEvent::cycle_failed(self.class, e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let current = transaction.current();
        if *current == candidate {
            debug!(%cycle_id, "[{}] 配置未变化", self.class);
            return Ok(CycleOutcome::Unchanged);
        }

        let diff = current.diff(&candidate);
        let snapshot = Arc::new(candidate);
        info!(%cycle_id, "[{}] 检测到配置变化: {} 个键", self.class, diff.len());

        if let Err(e) = self
            .dispatcher
            .dispatch(self.settings.strategy, &diff, snapshot.clone())
            .await
        {
            error!(%cycle_id, "[{}] 重载分发失败: {}", self.class, e);
            self.listeners
                .notify_event(&ReloadEvent::cycle_failed(self.class, e.to_string()))
                .await;
            return Err(e);
        }

        let changed = diff.len();
        let version = transaction.commit(snapshot, self.settings.strategy, &diff);
        self.listeners
            .notify_event(
                &ReloadEvent::snapshot_applied(self.class, version, changed)
                    .with_metadata("cycle_id", cycle_id.to_string()),
            )
            .await;

        Ok(CycleOutcome::Applied { version, changed })
    }

    fn set_state(&self, state: WatcherState) {
        self.state.send_replace(state);
    }
}

/// 监控任务句柄
pub struct WatcherHandle {
    class: WatchClass,
    state: watch::Receiver<WatcherState>,
    health: watch::Receiver<HealthStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), ConfigError>>>,
}

impl WatcherHandle {
    /// 监控类别
    pub fn class(&self) -> WatchClass {
        self.class
    }

    /// 当前状态
    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// 状态订阅
    pub fn state_receiver(&self) -> watch::Receiver<WatcherState> {
        self.state.clone()
    }

    /// 当前健康状态
    pub fn health(&self) -> HealthStatus {
        self.health.borrow().clone()
    }

    /// 停止该类别的监控，不影响其他类别
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// 任务是否已结束
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 等待任务结束
    pub async fn join(mut self) -> Result<(), ConfigError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ConfigError::watch(format!("[{}] 监控任务异常退出: {}", self.class, e)))?,
            None => Ok(()),
        }
    }
}

/// 集群资源变更触发源
///
/// 订阅一类资源在给定命名空间内的变更，可按资源名过滤。
pub struct ResourceChangeTrigger {
    client: Arc<dyn ResourceClient>,
    kind: ResourceKind,
    namespaces: Vec<String>,
    names: Option<BTreeSet<(String, String)>>,
}

impl ResourceChangeTrigger {
    /// 创建触发源
    pub fn new(client: Arc<dyn ResourceClient>, kind: ResourceKind, namespaces: Vec<String>) -> Self {
        Self {
            client,
            kind,
            namespaces,
            names: None,
        }
    }

    /// 只关注给定 `(命名空间, 名称)` 的资源；`None` 表示关注全部
    pub fn with_names(mut self, names: Option<BTreeSet<(String, String)>>) -> Self {
        self.names = names;
        self
    }
}

#[async_trait]
impl ChangeTrigger for ResourceChangeTrigger {
    async fn subscribe(&self) -> Result<ChangeStream, ConfigError> {
        let events = self.client.watch(self.kind, &self.namespaces).await?;
        let class = WatchClass::for_kind(self.kind);
        let names = self.names.clone();
        info!("订阅 {} 变更: 命名空间 {:?}", self.kind, self.namespaces);

        let notices = events.filter_map(move |event| {
            let notice = match event {
                Ok(event) => {
                    let relevant = names.as_ref().map_or(true, |names| {
                        names.contains(&(event.namespace.clone(), event.name.clone()))
                    });
                    relevant.then(|| {
                        Ok(ChangeNotice::new(class, event.resource_id(), event.change_type))
                    })
                }
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(notice)
        });

        Ok(Box::pin(notices))
    }
}

/// 挂载路径变更触发源
///
/// 监听各路径所在目录：挂载卷通常通过替换符号链接更新文件，
/// 直接监听文件会丢失这类变更。
pub struct MountedPathTrigger {
    paths: Vec<PathBuf>,
}

impl MountedPathTrigger {
    /// 创建触发源
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    fn watched_directories(&self) -> Vec<PathBuf> {
        let mut directories = BTreeSet::new();
        for path in &self.paths {
            let directory = if path.is_dir() {
                path.clone()
            } else {
                path.parent().map(PathBuf::from).unwrap_or_else(|| path.clone())
            };
            directories.insert(directory);
        }
        directories.into_iter().collect()
    }
}

fn change_type_for(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Modify(_) => Some(ChangeType::Updated),
        EventKind::Remove(_) => Some(ChangeType::Deleted),
        _ => None,
    }
}

#[async_trait]
impl ChangeTrigger for MountedPathTrigger {
    async fn subscribe(&self) -> Result<ChangeStream, ConfigError> {
        let (sender, receiver) = mpsc::unbounded_channel::<Result<Event, notify::Error>>();

        let mut watcher = recommended_watcher(move |res: Result<Event, notify::Error>| {
            // 接收端已释放说明订阅结束
            let _ = sender.send(res);
        })
        .map_err(|e| ConfigError::watch(format!("创建文件监控器失败: {}", e)))?;

        for directory in self.watched_directories() {
            watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .map_err(|e| ConfigError::watch(format!("监听目录失败: {} - {}", directory.display(), e)))?;
            info!("监听挂载目录: {}", directory.display());
        }

        // 监控器随流一起存活，流被丢弃时停止监听
        let notices = stream::unfold((receiver, watcher), |(mut receiver, watcher)| async move {
            loop {
                let Some(received) = receiver.recv().await else {
                    return None;
                };
                match received {
                    Ok(event) => {
                        let Some(change_type) = change_type_for(&event.kind) else {
                            continue;
                        };
                        let resource = event
                            .paths
                            .first()
                            .map(|path| path.display().to_string())
                            .unwrap_or_default();
                        let notice = ChangeNotice::new(WatchClass::MountedPaths, resource, change_type);
                        return Some((Ok(notice), (receiver, watcher)));
                    }
                    Err(e) => {
                        let error = ConfigError::watch(format!("文件监控错误: {}", e));
                        return Some((Err(error), (receiver, watcher)));
                    }
                }
            }
        });

        Ok(Box::pin(notices))
    }
}
