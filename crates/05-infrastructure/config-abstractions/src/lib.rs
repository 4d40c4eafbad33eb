//! # Configuration Abstractions
//!
//! 配置聚合与重载引擎的抽象层，定义外部协作者契约与快照类型。
//!
//! ## 核心接口
//!
//! - [`ResourceClient`] - 集群资源 API（get / list / watch）
//! - [`FileReader`] - 挂载路径读取
//! - [`ReloadTarget`] / [`ProcessSupervisor`] - 重载动作的承接方
//! - [`ReloadListener`] - 重载回调
//! - [`SnapshotResolver`] / [`ChangeTrigger`] - 监控器的两个输入

pub mod client;
pub mod events;
pub mod filesystem;
pub mod snapshot;
pub mod target;
pub mod watcher;

pub use client::*;
pub use events::*;
pub use filesystem::*;
pub use snapshot::*;
pub use target::*;
pub use watcher::*;
