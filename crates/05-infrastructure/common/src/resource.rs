//! 集群资源标识与原始载荷

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// 普通配置映射
    ConfigMap,
    /// 敏感配置
    Secret,
}

impl ResourceKind {
    /// 所有资源类型，按合并顺序排列（Secret 覆盖 ConfigMap）
    pub const ALL: [ResourceKind; 2] = [ResourceKind::ConfigMap, ResourceKind::Secret];

    /// 小写名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMap => "configmap",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 配置源
///
/// 指向一个集群资源，启动时由静态配置生成，之后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationSource {
    /// 资源类型
    pub kind: ResourceKind,
    /// 资源名称
    pub name: String,
    /// 命名空间
    pub namespace: String,
    /// 键前缀，设置后该源贡献的所有键都以 `<prefix>.` 开头
    pub prefix: Option<String>,
}

impl ConfigurationSource {
    /// 创建新的配置源
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            prefix: None,
        }
    }

    /// 设置键前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// 源标识，形如 `configmap/default/app`
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }

    /// 是否与给定资源同名同命名空间
    pub fn matches(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.kind == kind && self.namespace == namespace && self.name == name
    }
}

impl fmt::Display for ConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// 原始资源载荷
///
/// 仅在一次解析周期内存在。键按字典序保存，保证遍历顺序确定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    /// 资源类型
    pub kind: ResourceKind,
    /// 资源名称
    pub name: String,
    /// 命名空间
    pub namespace: String,
    /// 键到数据块的映射
    pub data: BTreeMap<String, Vec<u8>>,
    /// 资源标签
    pub labels: BTreeMap<String, String>,
}

impl RawResource {
    /// 创建新的资源载荷
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            data: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// 添加数据项
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// 添加标签
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// 资源标识，形如 `secret/default/app`
    pub fn source_id(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }

    /// 标签是否满足全部选择条件
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

/// 将标签选择器渲染为 `k1=v1,k2=v2`（按键排序）
pub fn render_label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// 解析 `k1=v1,k2=v2` 形式的标签选择器
pub fn parse_label_selector(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.trim().to_string()))
            }
        })
        .collect()
}
