//! 挂载路径读取抽象接口

use async_trait::async_trait;
use infrastructure_common::ConfigError;
use std::path::{Path, PathBuf};

/// 挂载文件内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedFile {
    /// 文件路径
    pub path: PathBuf,
    /// 文件内容
    pub content: String,
}

impl MountedFile {
    /// 创建新的挂载文件
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// 文件名，代替资源键名参与格式识别
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// 源标识
    pub fn source_id(&self) -> String {
        format!("file/{}", self.path.display())
    }

    /// 文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 文件读取 trait
#[async_trait]
pub trait FileReader: Send + Sync {
    /// 按输入顺序读取精确路径，不存在的路径被跳过
    async fn read_all(&self, paths: &[PathBuf]) -> Result<Vec<MountedFile>, ConfigError>;
}
