//! 快照存储
//!
//! 读取走 ArcSwap，无锁；替换必须先取得事务闸门，
//! 解析、比较、分发与提交在同一个临界区内完成。

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use config_abstractions::{EffectiveSnapshot, SnapshotDiff};
use infrastructure_common::ReloadStrategy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::MutexGuard;
use tracing::info;

/// 快照替换记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// 快照版本
    pub version: u64,
    /// 生效时间
    pub applied_at: DateTime<Utc>,
    /// 使用的重载策略，初始快照为 `None`
    pub strategy: Option<ReloadStrategy>,
    /// 变化的键
    pub changed_keys: BTreeSet<String>,
}

/// 快照存储
pub struct SnapshotStore {
    current: ArcSwap<EffectiveSnapshot>,
    gate: tokio::sync::Mutex<()>,
    version: AtomicU64,
    history: Mutex<VecDeque<SnapshotRecord>>,
    history_limit: usize,
}

impl SnapshotStore {
    /// 以初始快照创建存储，版本号从 0 开始
    pub fn new(initial: EffectiveSnapshot, history_limit: usize) -> Self {
        let history_limit = history_limit.max(1);
        let mut history = VecDeque::with_capacity(history_limit);
        history.push_back(SnapshotRecord {
            version: 0,
            applied_at: Utc::now(),
            strategy: None,
            changed_keys: initial.keys().map(str::to_string).collect(),
        });

        Self {
            current: ArcSwap::from_pointee(initial),
            gate: tokio::sync::Mutex::new(()),
            version: AtomicU64::new(0),
            history: Mutex::new(history),
            history_limit,
        }
    }

    /// 当前快照
    pub fn current(&self) -> Arc<EffectiveSnapshot> {
        self.current.load_full()
    }

    /// 当前版本
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// 替换历史，旧的在前
    pub fn history(&self) -> Vec<SnapshotRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// 开始一次替换事务
    ///
    /// 同一时刻只有一个事务存在，其他类别的周期在此排队。
    pub async fn begin(&self) -> SnapshotTransaction<'_> {
        SnapshotTransaction {
            store: self,
            _guard: self.gate.lock().await,
        }
    }
}

/// 快照替换事务
///
/// 持有期间快照不会被其他任务替换；丢弃而不提交即放弃替换。
pub struct SnapshotTransaction<'a> {
    store: &'a SnapshotStore,
    _guard: MutexGuard<'a, ()>,
}

impl SnapshotTransaction<'_> {
    /// 事务内的当前快照
    pub fn current(&self) -> Arc<EffectiveSnapshot> {
        self.store.current()
    }

    /// 提交新快照，返回新版本号
    pub fn commit(
        self,
        snapshot: Arc<EffectiveSnapshot>,
        strategy: ReloadStrategy,
        diff: &SnapshotDiff,
    ) -> u64 {
        self.store.current.store(snapshot);
        let version = self.store.version.fetch_add(1, Ordering::SeqCst) + 1;

        let mut history = self.store.history.lock();
        history.push_back(SnapshotRecord {
            version,
            applied_at: Utc::now(),
            strategy: Some(strategy),
            changed_keys: diff.changed_keys(),
        });
        while history.len() > self.store.history_limit {
            history.pop_front();
        }

        info!("配置快照已替换: 版本 {}，变化 {} 个键", version, diff.len());
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> EffectiveSnapshot {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_commit_replaces_and_versions() {
        let store = SnapshotStore::new(snapshot(&[("a", "1")]), 10);
        let before = store.current();

        let txn = store.begin().await;
        let next = snapshot(&[("a", "2")]);
        let diff = txn.current().diff(&next);
        let version = txn.commit(Arc::new(next), ReloadStrategy::Refresh, &diff);

        assert_eq!(version, 1);
        assert_eq!(store.version(), 1);
        assert_eq!(store.current().get("a"), Some("2"));
        assert_eq!(before.get("a"), Some("1"));

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].strategy, Some(ReloadStrategy::Refresh));
        assert!(history[1].changed_keys.contains("a"));
    }

    #[tokio::test]
    async fn test_dropped_transaction_leaves_snapshot() {
        let store = SnapshotStore::new(snapshot(&[("a", "1")]), 10);
        {
            let _txn = store.begin().await;
        }
        assert_eq!(store.version(), 0);
        assert_eq!(store.current().get("a"), Some("1"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = SnapshotStore::new(EffectiveSnapshot::empty(), 3);
        for i in 0..5 {
            let txn = store.begin().await;
            let value = i.to_string();
            let next = snapshot(&[("n", value.as_str())]);
            let diff = txn.current().diff(&next);
            txn.commit(Arc::new(next), ReloadStrategy::Refresh, &diff);
        }

        let versions: Vec<u64> = store.history().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_transactions_are_exclusive() {
        let store = Arc::new(SnapshotStore::new(EffectiveSnapshot::empty(), 10));
        let txn = store.begin().await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let txn = store.begin().await;
                txn.current().len()
            })
        };

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        let next = snapshot(&[("k", "v")]);
        let diff = txn.current().diff(&next);
        txn.commit(Arc::new(next), ReloadStrategy::Refresh, &diff);

        assert_eq!(contender.await.unwrap(), 1);
    }
}
