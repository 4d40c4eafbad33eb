//! 错误类型定义

use thiserror::Error;

/// 配置错误类型
///
/// 变体即错误分类：监控器根据分类决定跳过、重试、降级或终止。
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置资源不存在: {source_id}")]
    NotFound { source_id: String },

    #[error("配置文档解析失败: {source_id} [{key}] - {message}")]
    ParseError {
        source_id: String,
        key: String,
        message: String,
    },

    #[error("访问被拒绝: {resource} - {message}")]
    Authorization { resource: String, message: String },

    #[error("集群资源访问失败: {resource} - {message}")]
    Transport { resource: String, message: String },

    #[error("配置无效: {message}")]
    Configuration { message: String },

    #[error("重载分发失败: {message}")]
    Dispatch { message: String },

    #[error("进程终止请求失败: {message}")]
    ShutdownFailed { message: String },

    #[error("配置监控失败: {message}")]
    Watch { message: String },

    #[error("挂载文件读取失败: {source}")]
    FileRead {
        #[from]
        source: std::io::Error,
    },

    #[error("启动配置加载失败: {message}")]
    Settings { message: String },
}

impl ConfigError {
    /// 创建资源缺失错误
    pub fn not_found(source_id: impl Into<String>) -> Self {
        Self::NotFound {
            source_id: source_id.into(),
        }
    }

    /// 创建解析错误
    pub fn parse_error(
        source_id: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ParseError {
            source_id: source_id.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// 创建访问拒绝错误
    pub fn authorization(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authorization {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// 创建传输错误
    pub fn transport(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// 创建配置无效错误
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// 创建分发错误
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// 创建监控错误
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch {
            message: message.into(),
        }
    }

    /// 是否为瞬时错误，可在下一个周期重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::FileRead { .. } | Self::Dispatch { .. } | Self::Watch { .. }
        )
    }

    /// 是否为权限错误
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// 是否为资源缺失
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// 是否为解析错误
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::ParseError { .. })
    }

    /// 是否为致命错误（只有终止策略失败属于此类）
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ShutdownFailed { .. })
    }
}
