//! 启动配置属性
//!
//! 启动时读取一次，之后只读。所有字段都有默认值，空配置即可运行。

use crate::errors::ConfigError;
use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// 默认的 profile 标记键
pub const DEFAULT_PROFILE_MARKER_KEYS: [&str; 2] =
    ["spring.profiles", "spring.config.activate.on-profile"];

/// 重载策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReloadStrategy {
    /// 只重新绑定受影响的配置对象
    #[default]
    Refresh,
    /// 重建整个托管对象图，进程不退出
    RestartContext,
    /// 请求终止进程，由外部监管者重启
    Shutdown,
}

impl ReloadStrategy {
    /// 小写名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::RestartContext => "restart_context",
            Self::Shutdown => "shutdown",
        }
    }
}

/// 变更检测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// 订阅资源变更事件
    #[default]
    Event,
    /// 周期性轮询
    Polling,
}

/// 挂载路径与 API 源的合并顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountOrder {
    /// 挂载路径最后合并，优先级最高
    #[default]
    AfterApi,
    /// 挂载路径最先合并，可被 API 源覆盖
    BeforeApi,
}

/// 集群配置属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfigProperties {
    /// 应用逻辑名称，也是默认配置源名称
    pub application_name: String,
    /// 当前命名空间
    pub namespace: String,
    /// 激活的 profile，按声明顺序
    pub active_profiles: Vec<String>,
    /// 多文档 YAML 中声明 profile 的保留键
    pub profile_marker_keys: Vec<String>,
    /// ConfigMap 配置
    pub config_map: SourceKindProperties,
    /// Secret 配置
    pub secret: SourceKindProperties,
    /// 挂载路径合并顺序
    pub mount_order: MountOrder,
    /// 重载配置
    pub reload: ReloadProperties,
    /// 启动重试配置
    pub retry: RetryProperties,
}

impl Default for ClusterConfigProperties {
    fn default() -> Self {
        Self {
            application_name: "application".to_string(),
            namespace: "default".to_string(),
            active_profiles: Vec::new(),
            profile_marker_keys: DEFAULT_PROFILE_MARKER_KEYS
                .iter()
                .map(|key| key.to_string())
                .collect(),
            config_map: SourceKindProperties::default(),
            secret: SourceKindProperties::disabled(),
            mount_order: MountOrder::default(),
            reload: ReloadProperties::default(),
            retry: RetryProperties::default(),
        }
    }
}

impl ClusterConfigProperties {
    /// 获取指定资源类型的配置
    pub fn kind(&self, kind: ResourceKind) -> &SourceKindProperties {
        match kind {
            ResourceKind::ConfigMap => &self.config_map,
            ResourceKind::Secret => &self.secret,
        }
    }

    /// 指定资源类型的默认源名称
    pub fn source_name(&self, kind: ResourceKind) -> &str {
        self.kind(kind)
            .name
            .as_deref()
            .unwrap_or(&self.application_name)
    }

    /// 指定资源类型的默认命名空间
    pub fn source_namespace(&self, kind: ResourceKind) -> &str {
        self.kind(kind)
            .namespace
            .as_deref()
            .unwrap_or(&self.namespace)
    }

    /// 是否配置了任何挂载路径
    pub fn has_mounted_paths(&self) -> bool {
        ResourceKind::ALL
            .iter()
            .any(|kind| self.kind(*kind).enabled && !self.kind(*kind).paths.is_empty())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::configuration("命名空间不能为空"));
        }

        if self.reload.period_ms == 0 {
            return Err(ConfigError::configuration("轮询周期必须大于 0"));
        }

        if self.reload.debounce_ms == 0 {
            return Err(ConfigError::configuration("防抖窗口必须大于 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::configuration("启动重试次数必须大于 0"));
        }

        for kind in ResourceKind::ALL {
            let properties = self.kind(kind);
            if !properties.enabled {
                continue;
            }

            if properties.labels.keys().any(|key| key.trim().is_empty()) {
                return Err(ConfigError::configuration(format!(
                    "{} 的标签选择器包含空键",
                    kind
                )));
            }

            let has_default_name = !self.source_name(kind).trim().is_empty();
            let has_explicit_name = properties
                .sources
                .iter()
                .any(|source| source.name.as_deref().is_some_and(|name| !name.trim().is_empty()));
            if properties.enable_api && !has_default_name && !has_explicit_name {
                return Err(ConfigError::configuration(format!(
                    "{} 未设置应用名称，也没有显式指定配置源名称",
                    kind
                )));
            }
        }

        Ok(())
    }
}

/// 单一资源类型的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceKindProperties {
    /// 是否启用
    pub enabled: bool,
    /// 是否通过集群 API 读取
    pub enable_api: bool,
    /// 覆盖默认源名称
    pub name: Option<String>,
    /// 覆盖默认命名空间
    pub namespace: Option<String>,
    /// 显式附加的配置源
    pub sources: Vec<ExplicitSourceProperties>,
    /// 标签选择器
    pub labels: BTreeMap<String, String>,
    /// 挂载路径（精确路径，不递归展开目录）
    pub paths: Vec<PathBuf>,
    /// 是否追加 `name-<profile>` 源
    pub include_profile_specific_sources: bool,
    /// 启动时解析失败是否终止
    pub fail_fast: bool,
}

impl Default for SourceKindProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_api: true,
            name: None,
            namespace: None,
            sources: Vec::new(),
            labels: BTreeMap::new(),
            paths: Vec::new(),
            include_profile_specific_sources: true,
            fail_fast: false,
        }
    }
}

impl SourceKindProperties {
    /// 禁用的配置
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// 显式配置源
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplicitSourceProperties {
    /// 资源名称，缺省为应用名称
    pub name: Option<String>,
    /// 命名空间，缺省为当前命名空间
    pub namespace: Option<String>,
    /// 是否以资源名称作为键前缀
    pub use_name_as_prefix: bool,
}

impl ExplicitSourceProperties {
    /// 创建指定名称的显式源
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// 设置命名空间
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// 重载配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadProperties {
    /// 是否启用热重载
    pub enabled: bool,
    /// 重载策略
    pub strategy: ReloadStrategy,
    /// 检测模式
    pub mode: WatchMode,
    /// 轮询周期（毫秒）
    pub period_ms: u64,
    /// 事件合并窗口（毫秒）
    pub debounce_ms: u64,
    /// 重试退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// 是否监控 ConfigMap
    pub monitor_config_maps: bool,
    /// 是否监控 Secret
    pub monitor_secrets: bool,
    /// 是否监控挂载路径
    pub monitor_mounted_paths: bool,
    /// 快照历史保留条数
    pub history_limit: usize,
}

impl Default for ReloadProperties {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: ReloadStrategy::default(),
            mode: WatchMode::default(),
            period_ms: 15_000,
            debounce_ms: 500,
            max_backoff_ms: 300_000,
            monitor_config_maps: true,
            monitor_secrets: false,
            monitor_mounted_paths: true,
            history_limit: 10,
        }
    }
}

impl ReloadProperties {
    /// 轮询周期
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// 事件合并窗口
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// 退避上限
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// 启动重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryProperties {
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 初始间隔（毫秒）
    pub initial_interval_ms: u64,
    /// 最大间隔（毫秒）
    pub max_interval_ms: u64,
    /// 间隔倍数
    pub multiplier: f64,
}

impl Default for RetryProperties {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1_000,
            max_interval_ms: 2_000,
            multiplier: 1.1,
        }
    }
}

impl RetryProperties {
    /// 第 `attempt` 次失败后的等待间隔（从 1 开始）
    pub fn interval(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_interval_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_interval_ms as f64) as u64)
    }
}
