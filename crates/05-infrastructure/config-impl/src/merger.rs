//! 配置源合并

use config_abstractions::{EffectiveSnapshot, NormalizedEntries};
use infrastructure_common::MountOrder;
use std::collections::BTreeMap;

/// 按源顺序合并条目，后写入者覆盖先写入者
///
/// 条目的 profile 约束为空或与激活 profile 有交集时才参与合并。
pub fn merge(sources: &[NormalizedEntries], active_profiles: &[String]) -> EffectiveSnapshot {
    let mut properties = BTreeMap::new();
    apply(&mut properties, sources, active_profiles);
    EffectiveSnapshot::from_map(properties)
}

/// 合并 API 源与挂载路径源
///
/// 默认挂载路径最后合并，优先级最高；`MountOrder::BeforeApi` 时反过来。
pub fn merge_with_mounts(
    api_sources: &[NormalizedEntries],
    mounted_sources: &[NormalizedEntries],
    order: MountOrder,
    active_profiles: &[String],
) -> EffectiveSnapshot {
    let mut properties = BTreeMap::new();
    match order {
        MountOrder::AfterApi => {
            apply(&mut properties, api_sources, active_profiles);
            apply(&mut properties, mounted_sources, active_profiles);
        }
        MountOrder::BeforeApi => {
            apply(&mut properties, mounted_sources, active_profiles);
            apply(&mut properties, api_sources, active_profiles);
        }
    }
    EffectiveSnapshot::from_map(properties)
}

fn apply(
    properties: &mut BTreeMap<String, String>,
    sources: &[NormalizedEntries],
    active_profiles: &[String],
) {
    for source in sources {
        for entry in source.entries() {
            if entry.profile.matches(active_profiles) {
                properties.insert(entry.key.clone(), entry.value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_abstractions::{ProfileConstraint, PropertyEntry};

    /// 第三列为逗号分隔的 profile，空串表示无条件
    fn source(id: &str, entries: &[(&str, &str, &str)]) -> NormalizedEntries {
        let mut result = NormalizedEntries::new(id);
        for (key, value, profiles) in entries {
            let profile = if profiles.is_empty() {
                ProfileConstraint::always()
            } else {
                ProfileConstraint::any_of(profiles.split(','))
            };
            result.push(PropertyEntry::new(*key, *value).with_profile(profile));
        }
        result
    }

    fn profiles(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_later_source_wins() {
        let sources = vec![
            source("default", &[("a", "1", ""), ("b", "1", "")]),
            source("explicit", &[("b", "2", "")]),
        ];
        let snapshot = merge(&sources, &[]);
        assert_eq!(snapshot.get("a"), Some("1"));
        assert_eq!(snapshot.get("b"), Some("2"));
    }

    #[test]
    fn test_profile_filtering() {
        let sources = vec![source(
            "doc",
            &[("m", "base", ""), ("m", "dev", "dev"), ("m", "prod", "prod")],
        )];
        assert_eq!(merge(&sources, &profiles(&["dev"])).get("m"), Some("dev"));
        assert_eq!(merge(&sources, &profiles(&["prod"])).get("m"), Some("prod"));
        assert_eq!(merge(&sources, &profiles(&["prod", "dev"])).get("m"), Some("prod"));
        assert_eq!(merge(&sources, &[]).get("m"), Some("base"));
    }

    #[test]
    fn test_mount_order() {
        let api = vec![source("api", &[("k", "api", "")])];
        let mounts = vec![source("file", &[("k", "file", "")])];

        let after = merge_with_mounts(&api, &mounts, MountOrder::AfterApi, &[]);
        assert_eq!(after.get("k"), Some("file"));

        let before = merge_with_mounts(&api, &mounts, MountOrder::BeforeApi, &[]);
        assert_eq!(before.get("k"), Some("api"));
    }

    #[test]
    fn test_merge_is_deterministic() {
        let sources = vec![
            source("one", &[("z", "1", ""), ("a", "1", "")]),
            source("two", &[("m", "2", ""), ("z", "2", "")]),
        ];
        let first = merge(&sources, &[]);
        let second = merge(&sources, &[]);
        assert_eq!(first, second);
        assert_eq!(first.keys().collect::<Vec<_>>(), vec!["a", "m", "z"]);
    }
}
