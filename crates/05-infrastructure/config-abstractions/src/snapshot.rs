//! 配置条目与有效快照

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// profile 约束
///
/// 为空时无条件生效，否则任一 profile 被激活即生效。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProfileConstraint(Vec<String>);

impl ProfileConstraint {
    /// 无条件约束
    pub fn always() -> Self {
        Self(Vec::new())
    }

    /// 限定于给定 profile
    pub fn any_of<I, S>(profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(profiles.into_iter().map(Into::into).collect())
    }

    /// 是否无条件
    pub fn is_unconditional(&self) -> bool {
        self.0.is_empty()
    }

    /// 声明的 profile
    pub fn profiles(&self) -> &[String] {
        &self.0
    }

    /// 在给定激活 profile 下是否生效
    pub fn matches(&self, active_profiles: &[String]) -> bool {
        self.is_unconditional()
            || self
                .0
                .iter()
                .any(|profile| active_profiles.iter().any(|active| active == profile))
    }
}

/// 单个配置条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    /// 点分键
    pub key: String,
    /// 字符串值
    pub value: String,
    /// profile 约束
    pub profile: ProfileConstraint,
}

impl PropertyEntry {
    /// 创建无条件条目
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            profile: ProfileConstraint::always(),
        }
    }

    /// 设置 profile 约束
    pub fn with_profile(mut self, profile: ProfileConstraint) -> Self {
        self.profile = profile;
        self
    }
}

/// 单个资源归一化后的条目序列
///
/// 顺序即产生顺序：文档内顺序，再按文档顺序。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedEntries {
    /// 源标识
    pub source_id: String,
    entries: Vec<PropertyEntry>,
}

impl NormalizedEntries {
    /// 创建空条目序列
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            entries: Vec::new(),
        }
    }

    /// 追加条目
    pub fn push(&mut self, entry: PropertyEntry) {
        self.entries.push(entry);
    }

    /// 追加多个条目
    pub fn extend<I: IntoIterator<Item = PropertyEntry>>(&mut self, entries: I) {
        self.entries.extend(entries);
    }

    /// 所有条目
    pub fn entries(&self) -> &[PropertyEntry] {
        &self.entries
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 为所有键加上前缀
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        for entry in &mut self.entries {
            entry.key = format!("{}.{}", prefix, entry.key);
        }
        self
    }
}

/// 有效配置快照
///
/// 合并完成后只读。键按字典序存放，相同输入总是得到字节相同的快照。
///
/// 迭代顺序是键的字典序，不保留源顺序或文档内的声明顺序；
/// 优先级只在合并阶段生效，合并后每个键只剩一个值。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectiveSnapshot {
    properties: BTreeMap<String, String>,
}

impl EffectiveSnapshot {
    /// 空快照
    pub fn empty() -> Self {
        Self::default()
    }

    /// 从映射构建
    pub fn from_map(properties: BTreeMap<String, String>) -> Self {
        Self { properties }
    }

    /// 获取配置值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// 是否包含键
    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// 遍历所有条目
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// 所有键
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// 以给定前缀开头的子集（键保留完整形式）
    pub fn section(&self, prefix: &str) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter(|(key, _)| key_has_prefix(key, prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// 底层映射
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// 计算从 `self` 到 `newer` 的差异
    pub fn diff(&self, newer: &EffectiveSnapshot) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for (key, old_value) in &self.properties {
            match newer.properties.get(key) {
                None => {
                    diff.removed.insert(key.clone(), old_value.clone());
                }
                Some(new_value) if new_value != old_value => {
                    diff.changed
                        .insert(key.clone(), (old_value.clone(), new_value.clone()));
                }
                Some(_) => {}
            }
        }

        for (key, new_value) in &newer.properties {
            if !self.properties.contains_key(key) {
                diff.added.insert(key.clone(), new_value.clone());
            }
        }

        diff
    }
}

impl FromIterator<(String, String)> for EffectiveSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

/// 两个快照之间的差异
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// 新增的键
    pub added: BTreeMap<String, String>,
    /// 删除的键（旧值）
    pub removed: BTreeMap<String, String>,
    /// 值变化的键（旧值，新值）
    pub changed: BTreeMap<String, (String, String)>,
}

impl SnapshotDiff {
    /// 是否无差异
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// 变化的键总数
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// 所有变化的键
    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.added
            .keys()
            .chain(self.removed.keys())
            .chain(self.changed.keys())
            .cloned()
            .collect()
    }

    /// 所有变化键的前缀集合
    ///
    /// `a.b[0].c` 展开为 `a`、`a.b`、`a.b[0]`、`a.b[0].c`。
    pub fn changed_prefixes(&self) -> BTreeSet<String> {
        let mut prefixes = BTreeSet::new();
        for key in self.changed_keys() {
            for (index, ch) in key.char_indices() {
                if (ch == '.' || ch == '[') && index > 0 {
                    prefixes.insert(key[..index].to_string());
                }
            }
            prefixes.insert(key);
        }
        prefixes
    }

    /// 是否有变化键落在给定前缀下
    pub fn touches_prefix(&self, prefix: &str) -> bool {
        self.changed_keys()
            .iter()
            .any(|key| key_has_prefix(key, prefix))
    }
}

/// `key` 是否等于 `prefix` 或位于其下
pub fn key_has_prefix(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with('['),
        None => false,
    }
}
