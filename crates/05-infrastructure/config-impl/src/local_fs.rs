//! 本地文件系统读取

use async_trait::async_trait;
use config_abstractions::{FileReader, MountedFile};
use infrastructure_common::ConfigError;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

/// 基于 tokio::fs 的挂载文件读取器
///
/// 只读取精确路径，不展开目录。
#[derive(Debug, Clone, Default)]
pub struct LocalFileReader;

impl LocalFileReader {
    /// 创建新的读取器
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileReader for LocalFileReader {
    async fn read_all(&self, paths: &[PathBuf]) -> Result<Vec<MountedFile>, ConfigError> {
        let mut files = Vec::with_capacity(paths.len());

        for path in paths {
            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("挂载路径不存在，跳过: {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if metadata.is_dir() {
                warn!("挂载路径是目录，不做展开: {}", path.display());
                continue;
            }

            let content = tokio::fs::read_to_string(path).await?;
            files.push(MountedFile::new(path.clone(), content));
        }

        Ok(files)
    }
}
