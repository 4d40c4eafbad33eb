//! 快照解析
//!
//! 一次解析周期：定位 -> 拉取 -> 归一化 -> 合并。每个周期都重新解析
//! 所有启用的源，产出完整的候选快照。

use crate::locator::{SourceLocator, SourcePlan};
use crate::merger::merge_with_mounts;
use crate::normalizer::ResourceNormalizer;
use async_trait::async_trait;
use config_abstractions::{
    EffectiveSnapshot, FileReader, NormalizedEntries, ResourceClient, SnapshotResolver,
};
use futures::future::join_all;
use infrastructure_common::{
    ClusterConfigProperties, ConfigError, ConfigurationSource, RawResource, ResourceKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 基于集群资源与挂载路径的快照解析器
pub struct ClusterSnapshotResolver {
    properties: Arc<ClusterConfigProperties>,
    client: Arc<dyn ResourceClient>,
    file_reader: Arc<dyn FileReader>,
    normalizer: ResourceNormalizer,
    plans: Vec<SourcePlan>,
}

impl ClusterSnapshotResolver {
    /// 创建解析器，同时生成各类资源的解析计划
    pub fn new(
        properties: Arc<ClusterConfigProperties>,
        client: Arc<dyn ResourceClient>,
        file_reader: Arc<dyn FileReader>,
    ) -> Result<Self, ConfigError> {
        let mut plans = Vec::new();
        for kind in ResourceKind::ALL {
            if let Some(plan) = SourceLocator::plan(&properties, kind)? {
                info!(
                    "{} 解析计划: {} 个具名源{}",
                    kind,
                    plan.named.len(),
                    if plan.label_query.is_some() { "，含标签查询" } else { "" }
                );
                plans.push(plan);
            }
        }

        Ok(Self {
            normalizer: ResourceNormalizer::from_properties(&properties),
            properties,
            client,
            file_reader,
            plans,
        })
    }

    /// 所有解析计划，ConfigMap 在前
    pub fn plans(&self) -> &[SourcePlan] {
        &self.plans
    }

    /// 某类资源的解析计划
    pub fn plan(&self, kind: ResourceKind) -> Option<&SourcePlan> {
        self.plans.iter().find(|plan| plan.kind == kind)
    }

    /// 所有启用类型的挂载路径，ConfigMap 在前
    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        ResourceKind::ALL
            .iter()
            .map(|kind| self.properties.kind(*kind))
            .filter(|properties| properties.enabled)
            .flat_map(|properties| properties.paths.iter().cloned())
            .collect()
    }

    /// 解析所有 API 源，返回按合并顺序排列的条目
    ///
    /// 资源缺失与文档解析失败只影响对应的源；传输与权限错误终止整个周期。
    pub async fn resolve_api_sources(
        &self,
        cycle_id: Uuid,
    ) -> Result<Vec<NormalizedEntries>, ConfigError> {
        let mut results = Vec::new();

        for plan in &self.plans {
            let fetches = plan.named.iter().map(|source| self.fetch(source));
            for (source, fetched) in plan.named.iter().zip(join_all(fetches).await) {
                match fetched {
                    Ok(Some(resource)) => {
                        if let Some(entries) = self.normalize(cycle_id, &resource, source.prefix.as_deref()) {
                            results.push(entries);
                        }
                    }
                    Ok(None) => {
                        debug!(%cycle_id, "配置资源不存在，跳过: {}", source);
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(%cycle_id, "配置资源不存在，跳过: {} ({})", source, e);
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(query) = &plan.label_query {
                let mut listed = self
                    .client
                    .list(plan.kind, &query.namespace, &query.selector)
                    .await?;
                debug!(%cycle_id, "标签查询 {} 命中 {} 个资源", query.selector, listed.len());
                listed.sort_by(|a, b| a.name.cmp(&b.name));
                for resource in &listed {
                    if plan.named.contains(resource.kind, &resource.namespace, &resource.name) {
                        continue;
                    }
                    if let Some(entries) = self.normalize(cycle_id, resource, None) {
                        results.push(entries);
                    }
                }
            }
        }

        Ok(results)
    }

    /// 读取并归一化挂载路径
    pub async fn resolve_mounted_sources(
        &self,
        cycle_id: Uuid,
    ) -> Result<Vec<NormalizedEntries>, ConfigError> {
        let paths = self.mounted_paths();
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let files = self.file_reader.read_all(&paths).await?;
        let mut results = Vec::with_capacity(files.len());
        for file in &files {
            match self.normalizer.normalize_file(file) {
                Ok(entries) => results.push(entries),
                Err(e) => {
                    warn!(%cycle_id, "挂载文件 {} 被忽略: {}", file.path.display(), e);
                }
            }
        }
        Ok(results)
    }

    async fn fetch(&self, source: &ConfigurationSource) -> Result<Option<RawResource>, ConfigError> {
        self.client
            .get(source.kind, &source.name, &source.namespace)
            .await
    }

    fn normalize(
        &self,
        cycle_id: Uuid,
        resource: &RawResource,
        prefix: Option<&str>,
    ) -> Option<NormalizedEntries> {
        match self.normalizer.normalize(resource) {
            Ok(entries) => Some(match prefix {
                Some(prefix) => entries.with_prefix(prefix),
                None => entries,
            }),
            Err(e) => {
                warn!(%cycle_id, "配置资源 {} 被忽略: {}", resource.source_id(), e);
                None
            }
        }
    }
}

#[async_trait]
impl SnapshotResolver for ClusterSnapshotResolver {
    async fn resolve(&self) -> Result<EffectiveSnapshot, ConfigError> {
        let cycle_id = Uuid::new_v4();
        debug!(%cycle_id, "开始解析配置快照");

        let api_sources = self.resolve_api_sources(cycle_id).await?;
        let mounted_sources = self.resolve_mounted_sources(cycle_id).await?;

        let snapshot = merge_with_mounts(
            &api_sources,
            &mounted_sources,
            self.properties.mount_order,
            &self.properties.active_profiles,
        );
        debug!(
            %cycle_id,
            "配置快照解析完成: {} 个源，{} 个键",
            api_sources.len() + mounted_sources.len(),
            snapshot.len()
        );
        Ok(snapshot)
    }
}
