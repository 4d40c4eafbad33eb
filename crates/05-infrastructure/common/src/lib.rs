//! # Infrastructure Common
//!
//! 配置聚合与热重载引擎的公共类型。
//!
//! ## 核心组件
//!
//! - [`ConfigError`] - 统一的错误分类
//! - [`ClusterConfigProperties`] - 启动时读取的配置属性
//! - [`ConfigurationSource`] / [`RawResource`] - 集群资源标识与原始载荷
//! - [`HealthStatus`] - 监控器健康状态
//!
//! ## 设计原则
//!
//! - 所有类型不可变或显式所有，不依赖全局状态
//! - 错误分类决定监控器的降级与重试行为

pub mod configuration;
pub mod errors;
pub mod health;
pub mod resource;

pub use configuration::*;
pub use errors::*;
pub use health::*;
pub use resource::*;
