//! 健康状态定义

use serde::{Deserialize, Serialize};

/// 健康状态
///
/// 监控器正常订阅时为健康，退化为轮询时为降级，停止监控时为不健康。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "data")]
pub enum HealthStatus {
    /// 健康状态
    Healthy,
    /// 降级状态
    Degraded { message: String },
    /// 不健康状态
    Unhealthy { error: String },
}

impl HealthStatus {
    /// 创建降级状态
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::Degraded {
            message: message.into(),
        }
    }

    /// 创建不健康状态
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self::Unhealthy {
            error: error.into(),
        }
    }

    /// 检查是否健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 检查是否降级
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// 检查是否不健康
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy { .. })
    }
}
