//! 刷新作用域
//!
//! 消费方按键前缀注册可刷新绑定，刷新时只重新绑定前缀落在变化集合中的绑定。

use async_trait::async_trait;
use config_abstractions::{ContextRestarter, EffectiveSnapshot, RefreshableBinding, ReloadTarget};
use dashmap::DashMap;
use infrastructure_common::ConfigError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 刷新作用域
pub struct RefreshScope {
    bindings: DashMap<String, Arc<dyn RefreshableBinding>>,
    restarter: RwLock<Option<Arc<dyn ContextRestarter>>>,
    rebind_count: AtomicU64,
}

impl RefreshScope {
    /// 创建空作用域
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            restarter: RwLock::new(None),
            rebind_count: AtomicU64::new(0),
        }
    }

    /// 注册绑定，同名绑定被替换
    pub fn register(&self, binding: Arc<dyn RefreshableBinding>) {
        debug!("注册可刷新绑定: {} -> {}", binding.name(), binding.prefix());
        self.bindings.insert(binding.name().to_string(), binding);
    }

    /// 移除绑定
    pub fn unregister(&self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    /// 设置上下文重建回调
    pub fn set_restarter(&self, restarter: Arc<dyn ContextRestarter>) {
        *self.restarter.write() = Some(restarter);
    }

    /// 所有绑定名称（排序）
    pub fn binding_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// 绑定数量
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// 是否没有绑定
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 累计重新绑定次数
    pub fn rebind_count(&self) -> u64 {
        self.rebind_count.load(Ordering::SeqCst)
    }

    /// 用快照重新绑定所有绑定
    pub fn rebind_all(&self, snapshot: &EffectiveSnapshot) -> Result<(), ConfigError> {
        self.rebind_where(snapshot, |_| true)
    }

    /// 按名称顺序重新绑定满足条件的绑定；绑定失败不影响其他绑定，最后汇总报告
    fn rebind_where<F>(&self, snapshot: &EffectiveSnapshot, selected: F) -> Result<(), ConfigError>
    where
        F: Fn(&dyn RefreshableBinding) -> bool,
    {
        let mut bindings: Vec<Arc<dyn RefreshableBinding>> = self
            .bindings
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        bindings.sort_by(|a, b| a.name().cmp(b.name()));

        let mut failures = Vec::new();
        for binding in &bindings {
            if !selected(&**binding) {
                continue;
            }
            match binding.rebind(snapshot) {
                Ok(()) => {
                    self.rebind_count.fetch_add(1, Ordering::SeqCst);
                    debug!("绑定 {} 已重新绑定", binding.name());
                }
                Err(e) => {
                    warn!("绑定 {} 重新绑定失败: {}", binding.name(), e);
                    failures.push(binding.name().to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::dispatch(format!(
                "以下绑定重新绑定失败: {}",
                failures.join(", ")
            )))
        }
    }
}

impl Default for RefreshScope {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReloadTarget for RefreshScope {
    async fn refresh(
        &self,
        changed_prefixes: &BTreeSet<String>,
        snapshot: Arc<EffectiveSnapshot>,
    ) -> Result<(), ConfigError> {
        self.rebind_where(&snapshot, |binding| {
            binding.prefix().is_empty() || changed_prefixes.contains(binding.prefix())
        })
    }

    async fn restart_context(&self, snapshot: Arc<EffectiveSnapshot>) -> Result<(), ConfigError> {
        let restarter = self.restarter.read().clone();
        match restarter {
            Some(restarter) => {
                info!("重建应用上下文");
                restarter.restart(snapshot.clone()).await?;
            }
            None => {
                info!("未设置上下文重建回调，重新绑定全部 {} 个绑定", self.len());
            }
        }
        self.rebind_all(&snapshot)
    }
}

/// 回调形式的绑定
///
/// 回调收到前缀下的全部键值（键保留完整形式）。
pub struct CallbackBinding<F> {
    name: String,
    prefix: String,
    callback: F,
}

impl<F> CallbackBinding<F>
where
    F: Fn(&BTreeMap<String, String>) -> Result<(), ConfigError> + Send + Sync,
{
    /// 创建回调绑定
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            callback,
        }
    }
}

impl<F> RefreshableBinding for CallbackBinding<F>
where
    F: Fn(&BTreeMap<String, String>) -> Result<(), ConfigError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn rebind(&self, snapshot: &EffectiveSnapshot) -> Result<(), ConfigError> {
        (self.callback)(&snapshot.section(&self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn snapshot(pairs: &[(&str, &str)]) -> Arc<EffectiveSnapshot> {
        Arc::new(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    fn recording(name: &str, prefix: &str, seen: Arc<Mutex<Vec<String>>>) -> Arc<dyn RefreshableBinding> {
        let name_owned = name.to_string();
        Arc::new(CallbackBinding::new(name, prefix, move |section| {
            seen.lock()
                .push(format!("{}:{}", name_owned, section.len()));
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_refresh_only_touches_matching_prefixes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let scope = RefreshScope::new();
        scope.register(recording("greeting", "greeting", seen.clone()));
        scope.register(recording("pool", "pool", seen.clone()));

        let old = snapshot(&[("greeting.message", "hi"), ("pool.size", "1")]);
        let new = snapshot(&[("greeting.message", "hello"), ("pool.size", "1")]);
        let prefixes = old.diff(&new).changed_prefixes();

        scope.refresh(&prefixes, new).await.unwrap();
        assert_eq!(*seen.lock(), vec!["greeting:1".to_string()]);
        assert_eq!(scope.rebind_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_without_restarter_rebinds_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let scope = RefreshScope::new();
        scope.register(recording("b", "pool", seen.clone()));
        scope.register(recording("a", "greeting", seen.clone()));

        scope
            .restart_context(snapshot(&[("greeting.message", "hi")]))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec!["a:1".to_string(), "b:0".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_binding_is_reported() {
        let scope = RefreshScope::new();
        scope.register(Arc::new(CallbackBinding::new("broken", "x", |_| {
            Err(ConfigError::configuration("bad value"))
        })));

        let prefixes: BTreeSet<String> = ["x".to_string()].into_iter().collect();
        let error = scope
            .refresh(&prefixes, snapshot(&[("x", "1")]))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("broken"));
        assert!(scope.unregister("broken"));
        assert!(scope.is_empty());
    }

    struct CountingRestarter(Mutex<usize>);

    #[async_trait]
    impl ContextRestarter for CountingRestarter {
        async fn restart(&self, _snapshot: Arc<EffectiveSnapshot>) -> Result<(), ConfigError> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_restart_uses_restarter() {
        let scope = RefreshScope::new();
        let restarter = Arc::new(CountingRestarter(Mutex::new(0)));
        scope.set_restarter(restarter.clone());

        scope.restart_context(snapshot(&[])).await.unwrap();
        assert_eq!(*restarter.0.lock(), 1);
    }
}
