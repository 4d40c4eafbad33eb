//! # Configuration Implementation
//!
//! 配置聚合与热重载引擎的具体实现。
//!
//! ## 主要组件
//!
//! - [`ConfigReloadController`] - 启动解析并管理各类别的监控任务
//! - [`ClusterSnapshotResolver`] - 定位、读取、规范化并合并所有配置源
//! - [`ResourceNormalizer`] - 把原始载荷转换为带 profile 约束的条目
//! - [`SnapshotStore`] - 当前有效快照与替换历史
//! - [`ChangeWatcher`] - 事件 / 轮询两种模式的变更监控
//! - [`ReloadDispatcher`] - 按策略分发重载
//! - [`RefreshScope`] - 按键前缀刷新的可重绑定对象
//! - [`InMemoryResourceClient`] - 内存实现的集群资源客户端

pub mod controller;
pub mod dispatcher;
pub mod event_handler;
pub mod local_fs;
pub mod locator;
pub mod memory;
pub mod merger;
pub mod normalizer;
pub mod properties;
pub mod refresh_scope;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod watcher;

pub use controller::*;
pub use dispatcher::*;
pub use event_handler::*;
pub use local_fs::*;
pub use locator::*;
pub use memory::*;
pub use merger::*;
pub use normalizer::*;
pub use properties::*;
pub use refresh_scope::*;
pub use resolver::*;
pub use settings::*;
pub use store::*;
pub use watcher::*;
