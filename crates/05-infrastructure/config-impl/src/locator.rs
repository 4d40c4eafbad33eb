//! 配置源定位器
//!
//! 把静态配置中的应用名、命名空间、显式源列表与激活的 profile
//! 展开为有序的配置源列表。只读取静态配置，不做任何 I/O。

use infrastructure_common::{
    render_label_selector, ClusterConfigProperties, ConfigError, ConfigurationSource,
    ExplicitSourceProperties, ResourceKind,
};
use std::collections::BTreeSet;
use tracing::debug;

/// 有序配置源列表
///
/// 越靠后的源在合并时优先级越高。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceList {
    sources: Vec<ConfigurationSource>,
}

impl SourceList {
    /// 所有配置源
    pub fn sources(&self) -> &[ConfigurationSource] {
        &self.sources
    }

    /// 源数量
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 遍历配置源
    pub fn iter(&self) -> impl Iterator<Item = &ConfigurationSource> {
        self.sources.iter()
    }

    /// 涉及的命名空间（去重，保持首次出现顺序）
    pub fn namespaces(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.sources
            .iter()
            .filter(|source| seen.insert(source.namespace.clone()))
            .map(|source| source.namespace.clone())
            .collect()
    }

    /// 是否包含给定资源
    pub fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.sources
            .iter()
            .any(|source| source.matches(kind, namespace, name))
    }

    /// 同一资源重复出现时只保留最后一次，合并结果不变
    fn push(&mut self, source: ConfigurationSource) {
        self.sources
            .retain(|existing| !existing.matches(source.kind, &source.namespace, &source.name));
        self.sources.push(source);
    }
}

/// 标签选择查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelQuery {
    /// 查询的命名空间
    pub namespace: String,
    /// 渲染后的选择器，形如 `k1=v1,k2=v2`
    pub selector: String,
}

/// 单个资源类型的解析计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    /// 资源类型
    pub kind: ResourceKind,
    /// 按名称定位的配置源
    pub named: SourceList,
    /// 标签选择查询，结果追加在具名源之后
    pub label_query: Option<LabelQuery>,
}

impl SourcePlan {
    /// 需要订阅的命名空间
    pub fn watch_namespaces(&self) -> Vec<String> {
        let mut namespaces = self.named.namespaces();
        if let Some(query) = &self.label_query {
            if !namespaces.contains(&query.namespace) {
                namespaces.push(query.namespace.clone());
            }
        }
        namespaces
    }

    /// 需要关注的 `(命名空间, 名称)`，存在标签查询时返回 `None`（名称不可预知）
    pub fn watched_names(&self) -> Option<BTreeSet<(String, String)>> {
        if self.label_query.is_some() {
            return None;
        }
        Some(
            self.named
                .iter()
                .map(|source| (source.namespace.clone(), source.name.clone()))
                .collect(),
        )
    }
}

/// 配置源定位器
pub struct SourceLocator;

impl SourceLocator {
    /// 展开配置源列表
    ///
    /// 顺序：默认源、显式源、每个激活 profile 对应的 `<name>-<profile>` 变体。
    /// profile 变体按 profile 声明顺序排在所有基础源之后。
    pub fn resolve(
        kind: ResourceKind,
        app_name: &str,
        default_namespace: &str,
        explicit_sources: &[ExplicitSourceProperties],
        active_profiles: &[String],
    ) -> Result<SourceList, ConfigError> {
        let app_name = app_name.trim();
        let mut base = Vec::new();

        if !app_name.is_empty() {
            base.push(ConfigurationSource::new(kind, app_name, default_namespace));
        }

        for explicit in explicit_sources {
            let name = explicit
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(app_name);
            if name.is_empty() {
                continue;
            }

            let namespace = explicit
                .namespace
                .as_deref()
                .filter(|namespace| !namespace.trim().is_empty())
                .unwrap_or(default_namespace);

            let mut source = ConfigurationSource::new(kind, name, namespace);
            if explicit.use_name_as_prefix {
                source = source.with_prefix(name);
            }
            base.push(source);
        }

        if base.is_empty() {
            return Err(ConfigError::configuration(format!(
                "{} 未设置应用名称，也没有显式指定配置源名称",
                kind
            )));
        }

        let mut list = SourceList::default();
        for source in &base {
            list.push(source.clone());
        }

        for profile in active_profiles {
            let profile = profile.trim();
            if profile.is_empty() {
                continue;
            }
            for source in &base {
                let mut variant = ConfigurationSource::new(
                    kind,
                    format!("{}-{}", source.name, profile),
                    source.namespace.clone(),
                );
                variant.prefix = source.prefix.clone();
                list.push(variant);
            }
        }

        debug!("{} 配置源定位完成: {} 个", kind, list.len());
        Ok(list)
    }

    /// 根据启动配置生成某类资源的解析计划
    ///
    /// 该类资源被禁用或关闭了 API 读取时返回 `None`。
    pub fn plan(
        properties: &ClusterConfigProperties,
        kind: ResourceKind,
    ) -> Result<Option<SourcePlan>, ConfigError> {
        let kind_properties = properties.kind(kind);
        if !kind_properties.enabled || !kind_properties.enable_api {
            return Ok(None);
        }

        let profiles: &[String] = if kind_properties.include_profile_specific_sources {
            &properties.active_profiles
        } else {
            &[]
        };

        let named = Self::resolve(
            kind,
            properties.source_name(kind),
            properties.source_namespace(kind),
            &kind_properties.sources,
            profiles,
        )?;

        let label_query = if kind_properties.labels.is_empty() {
            None
        } else {
            Some(LabelQuery {
                namespace: properties.source_namespace(kind).to_string(),
                selector: render_label_selector(&kind_properties.labels),
            })
        };

        Ok(Some(SourcePlan {
            kind,
            named,
            label_query,
        }))
    }
}
