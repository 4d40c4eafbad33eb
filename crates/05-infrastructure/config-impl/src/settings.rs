//! 启动配置加载
//!
//! 可选的配置文件（YAML / TOML / JSON，按扩展名识别）叠加 `<PREFIX>_` 开头的
//! 环境变量，嵌套层级用 `__` 分隔，例如 `RELOADER_RELOAD__PERIOD_MS=5000`。

use config::{Config, Environment, File};
use infrastructure_common::{ClusterConfigProperties, ConfigError};
use std::path::Path;
use tracing::{debug, info};

/// 默认环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "RELOADER";

/// 加载并校验启动配置
pub fn load_settings(
    path: Option<&Path>,
    env_prefix: &str,
) -> Result<ClusterConfigProperties, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        info!("加载启动配置文件: {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("active_profiles"),
    );

    let settings = builder.build().map_err(|e| ConfigError::Settings {
        message: e.to_string(),
    })?;

    let properties: ClusterConfigProperties =
        settings.try_deserialize().map_err(|e| ConfigError::Settings {
            message: e.to_string(),
        })?;

    properties.validate()?;
    debug!("启动配置: {:?}", properties);
    Ok(properties)
}
