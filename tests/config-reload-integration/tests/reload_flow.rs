//! 配置聚合与热重载的端到端测试
//!
//! 通过内存集群客户端驱动控制器，覆盖 profile 叠加、优先级、
//! 载荷识别、无变化检测、防抖、轮询容错与各重载策略。

use config_abstractions::{ReloadListener, SnapshotDiff, SnapshotResolver, WatchClass};
use config_impl::{
    CallbackBinding, ConfigReloadController, InMemoryResourceClient, RunningController,
};
use infrastructure_common::{
    ClusterConfigProperties, ConfigError, ExplicitSourceProperties, MountOrder, RawResource,
    ReloadStrategy, ResourceKind, WatchMode,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const APPLICATION_YAML: &str = r#"greeting:
  message: Say Hello to the World
farewell:
  message: Say Goodbye
---
spring:
  profiles: development
greeting:
  message: Say Hello to the Developers
farewell:
  message: Say Goodbye to the Developers
---
spring:
  profiles: production
greeting:
  message: Say Hello to the Ops
"#;

fn properties() -> ClusterConfigProperties {
    let mut properties = ClusterConfigProperties::default();
    properties.reload.period_ms = 1_000;
    properties.reload.debounce_ms = 500;
    properties.retry.max_attempts = 1;
    properties
}

fn reloading(mode: WatchMode, strategy: ReloadStrategy) -> ClusterConfigProperties {
    let mut properties = properties();
    properties.reload.enabled = true;
    properties.reload.mode = mode;
    properties.reload.strategy = strategy;
    properties
}

fn config_map(name: &str, entries: &[(&str, &str)]) -> RawResource {
    entries.iter().fold(
        RawResource::new(ResourceKind::ConfigMap, name, "default"),
        |resource, (key, value)| resource.with_entry(*key, value.as_bytes().to_vec()),
    )
}

fn greeting_map(message: &str) -> RawResource {
    config_map(
        "application",
        &[("greeting.message", message), ("farewell.message", "bye")],
    )
}

async fn start(
    properties: ClusterConfigProperties,
    client: &Arc<InMemoryResourceClient>,
) -> RunningController {
    ConfigReloadController::builder(properties)
        .with_client(client.clone())
        .start()
        .await
        .unwrap()
}

async fn snapshot_for(profiles: &[&str]) -> BTreeMap<String, String> {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map("application", &[("application.yml", APPLICATION_YAML)]));

    let mut properties = properties();
    properties.active_profiles = profiles.iter().map(|profile| profile.to_string()).collect();
    let running = start(properties, &client).await;
    let snapshot = running.current_snapshot().as_map().clone();
    running.shutdown().await.unwrap();
    snapshot
}

#[derive(Default)]
struct CountingListener {
    reloads: AtomicUsize,
    strategies: Mutex<Vec<ReloadStrategy>>,
}

impl CountingListener {
    fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl ReloadListener for CountingListener {
    fn on_reload(&self, strategy: ReloadStrategy, _diff: &SnapshotDiff) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.strategies.lock().push(strategy);
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[tokio::test]
async fn test_development_profile_overlay() {
    let snapshot = snapshot_for(&["development"]).await;
    assert_eq!(snapshot["greeting.message"], "Say Hello to the Developers");
    assert_eq!(snapshot["farewell.message"], "Say Goodbye to the Developers");
    assert!(!snapshot.keys().any(|key| key.starts_with("spring.")));
}

#[tokio::test]
async fn test_production_profile_overlay_inherits_base() {
    let snapshot = snapshot_for(&["production"]).await;
    assert_eq!(snapshot["greeting.message"], "Say Hello to the Ops");
    assert_eq!(snapshot["farewell.message"], "Say Goodbye");
}

#[tokio::test]
async fn test_last_matching_document_wins() {
    let declared_order = snapshot_for(&["development", "production"]).await;
    assert_eq!(declared_order["greeting.message"], "Say Hello to the Ops");
    assert_eq!(declared_order["farewell.message"], "Say Goodbye to the Developers");

    let reversed = snapshot_for(&["production", "development"]).await;
    assert_eq!(reversed, declared_order);
}

#[tokio::test]
async fn test_no_profile_uses_base_document() {
    let snapshot = snapshot_for(&[]).await;
    assert_eq!(snapshot["greeting.message"], "Say Hello to the World");
    assert_eq!(snapshot["farewell.message"], "Say Goodbye");
}

#[tokio::test]
async fn test_later_explicit_source_takes_precedence() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map("application", &[("pool.size", "4"), ("pool.name", "main")]));
    client.apply(config_map("overrides", &[("pool.size", "8"), ("pool.idle", "2")]));

    let mut properties = properties();
    properties.config_map.sources = vec![ExplicitSourceProperties::named("overrides")];
    let running = start(properties, &client).await;

    let snapshot = running.current_snapshot();
    assert_eq!(snapshot.get("pool.size"), Some("8"));
    assert_eq!(snapshot.get("pool.name"), Some("main"));
    assert_eq!(snapshot.get("pool.idle"), Some("2"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_profile_specific_resource_overrides_base() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map("application", &[("db.url", "base"), ("db.user", "app")]));
    client.apply(config_map("application-staging", &[("db.url", "staging")]));

    let mut properties = properties();
    properties.active_profiles = vec!["staging".to_string()];
    let running = start(properties, &client).await;

    let snapshot = running.current_snapshot();
    assert_eq!(snapshot.get("db.url"), Some("staging"));
    assert_eq!(snapshot.get("db.user"), Some("app"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_key_yaml_blob_is_parsed() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map(
        "application",
        &[("app-config.yaml", "server:\n  port: 8080\n  hosts:\n    - a\n    - b\n")],
    ));

    let running = start(properties(), &client).await;
    let snapshot = running.current_snapshot();
    assert_eq!(snapshot.get("server.port"), Some("8080"));
    assert_eq!(snapshot.get("server.hosts[0]"), Some("a"));
    assert_eq!(snapshot.get("server.hosts[1]"), Some("b"));
    assert!(!snapshot.contains_key("app-config.yaml"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_multi_key_resource_is_taken_verbatim() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map(
        "application",
        &[("pool.size.core", "1"), ("pool.size.max", "16")],
    ));

    let running = start(properties(), &client).await;
    let expected: BTreeMap<String, String> = [
        ("pool.size.core".to_string(), "1".to_string()),
        ("pool.size.max".to_string(), "16".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(running.current_snapshot().as_map(), &expected);
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broken_source_is_dropped_without_failing_startup() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map("application", &[("application.yaml", "key: [unclosed")]));
    client.apply(config_map("extra", &[("a", "1"), ("b", "2")]));

    let mut properties = properties();
    properties.config_map.sources = vec![ExplicitSourceProperties::named("extra")];
    let running = start(properties, &client).await;

    let snapshot = running.current_snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get("a"), Some("1"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map("application", &[("application.yml", APPLICATION_YAML)]));
    client.apply(config_map("overrides", &[("z", "1"), ("a", "2"), ("m", "3")]));

    let mut properties = properties();
    properties.active_profiles = vec!["development".to_string()];
    properties.config_map.sources = vec![ExplicitSourceProperties::named("overrides")];
    let running = start(properties, &client).await;

    let first = running.resolver().resolve().await.unwrap();
    for _ in 0..5 {
        let again = running.resolver().resolve().await.unwrap();
        assert_eq!(again, first);
        assert_eq!(format!("{:?}", again), format!("{:?}", first));
    }
    assert_eq!(*running.current_snapshot(), first);
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_secrets_selected_by_label_follow_config_maps() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(config_map("application", &[("db.password", "placeholder"), ("db.user", "app")]));
    client.apply(
        RawResource::new(ResourceKind::Secret, "zz-credentials", "default")
            .with_label("team", "orders")
            .with_entry("db.password", b"from-secret".to_vec()),
    );
    client.apply(
        RawResource::new(ResourceKind::Secret, "aa-credentials", "default")
            .with_label("team", "orders")
            .with_entry("db.password", b"shadowed".to_vec()),
    );
    client.apply(
        RawResource::new(ResourceKind::Secret, "other", "default")
            .with_label("team", "billing")
            .with_entry("db.password", b"ignored".to_vec()),
    );

    let mut properties = properties();
    properties.secret.enabled = true;
    properties.secret.labels.insert("team".to_string(), "orders".to_string());
    let running = start(properties, &client).await;

    let snapshot = running.current_snapshot();
    assert_eq!(snapshot.get("db.password"), Some("from-secret"));
    assert_eq!(snapshot.get("db.user"), Some("app"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mounted_files_merge_after_api_sources() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("application.properties");
    std::fs::write(&path, "greeting.message=from-file\nmounted.only=yes\n").unwrap();

    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("from-api"));

    let mut properties = properties();
    properties.config_map.paths = vec![path.clone()];
    let running = start(properties.clone(), &client).await;
    let snapshot = running.current_snapshot();
    assert_eq!(snapshot.get("greeting.message"), Some("from-file"));
    assert_eq!(snapshot.get("mounted.only"), Some("yes"));
    assert_eq!(snapshot.get("farewell.message"), Some("bye"));
    running.shutdown().await.unwrap();

    properties.mount_order = MountOrder::BeforeApi;
    let running = start(properties, &client).await;
    assert_eq!(
        running.current_snapshot().get("greeting.message"),
        Some("from-api")
    );
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_startup_failure_respects_fail_fast() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    client.fail_next_get(10);

    let mut lenient = properties();
    lenient.retry.max_attempts = 3;
    let running = start(lenient.clone(), &client).await;
    assert!(running.current_snapshot().is_empty());
    assert_eq!(client.get_calls(), 3);
    running.shutdown().await.unwrap();

    let mut strict = lenient;
    strict.config_map.fail_fast = true;
    let error = ConfigReloadController::builder(strict)
        .with_client(client.clone())
        .start()
        .await
        .err()
        .unwrap();
    assert!(matches!(error, ConfigError::Transport { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_startup_retry_recovers_from_transient_failure() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    client.fail_next_get(1);

    let mut properties = properties();
    properties.retry.max_attempts = 3;
    properties.config_map.fail_fast = true;
    let running = start(properties, &client).await;
    assert_eq!(running.current_snapshot().get("greeting.message"), Some("hello"));
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_resources_never_dispatch() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    let listener = Arc::new(CountingListener::default());

    let running = ConfigReloadController::builder(reloading(WatchMode::Polling, ReloadStrategy::Refresh))
        .with_client(client.clone())
        .with_listener(listener.clone())
        .start()
        .await
        .unwrap();

    sleep(Duration::from_millis(3_500)).await;
    assert_eq!(client.get_calls(), 4);
    assert_eq!(listener.reloads(), 0);
    assert_eq!(running.snapshot_version(), 0);

    // 同值重写也不算变化
    client.apply(greeting_map("hello"));
    sleep(Duration::from_secs(1)).await;
    assert_eq!(listener.reloads(), 0);
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_is_coalesced() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    let listener = Arc::new(CountingListener::default());

    let running = ConfigReloadController::builder(reloading(WatchMode::Event, ReloadStrategy::Refresh))
        .with_client(client.clone())
        .with_listener(listener.clone())
        .start()
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(client.watcher_count(), 1);

    for revision in 1..=5 {
        client.apply(greeting_map(&format!("hello #{}", revision)));
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_secs(2)).await;

    assert_eq!(client.get_calls(), 2);
    assert_eq!(listener.reloads(), 1);
    assert_eq!(running.snapshot_version(), 1);
    assert_eq!(
        running.current_snapshot().get("greeting.message"),
        Some("hello #5")
    );
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_resource_changes_are_ignored() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));

    let running = start(reloading(WatchMode::Event, ReloadStrategy::Refresh), &client).await;
    sleep(Duration::from_millis(10)).await;

    client.apply(config_map("someone-else", &[("x", "1")]));
    sleep(Duration::from_secs(2)).await;
    assert_eq!(client.get_calls(), 1);
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failure_keeps_last_good_snapshot() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));

    let running = start(reloading(WatchMode::Polling, ReloadStrategy::Refresh), &client).await;
    client.apply(greeting_map("changed"));
    client.fail_next_get(1);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(running.snapshot_version(), 0);
    assert_eq!(running.current_snapshot().get("greeting.message"), Some("hello"));
    assert!(running.health().is_healthy());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(running.snapshot_version(), 1);
    assert_eq!(running.current_snapshot().get("greeting.message"), Some("changed"));
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_refresh_rebinds_only_affected_bindings() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    let running = start(reloading(WatchMode::Event, ReloadStrategy::Refresh), &client).await;

    let greetings = Arc::new(Mutex::new(Vec::new()));
    let farewells = Arc::new(AtomicUsize::new(0));
    let seen = greetings.clone();
    running
        .bind(Arc::new(CallbackBinding::new("greeting", "greeting", move |section| {
            if let Some(message) = section.get("greeting.message") {
                seen.lock().push(message.clone());
            }
            Ok(())
        })))
        .unwrap();
    let counter = farewells.clone();
    running
        .bind(Arc::new(CallbackBinding::new("farewell", "farewell", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })))
        .unwrap();

    sleep(Duration::from_millis(10)).await;
    client.apply(greeting_map("hi"));
    sleep(Duration::from_secs(1)).await;

    assert_eq!(*greetings.lock(), vec!["hello".to_string(), "hi".to_string()]);
    assert_eq!(farewells.load(Ordering::SeqCst), 1);
    assert_eq!(running.history().last().map(|record| record.strategy), Some(Some(ReloadStrategy::Refresh)));
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_strategy_cancels_root_token() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    let listener = Arc::new(CountingListener::default());

    let running = ConfigReloadController::builder(reloading(WatchMode::Event, ReloadStrategy::Shutdown))
        .with_client(client.clone())
        .with_listener(listener.clone())
        .start()
        .await
        .unwrap();
    let token = running.cancellation_token();
    sleep(Duration::from_millis(10)).await;
    assert!(!token.is_cancelled());

    client.apply(greeting_map("new value"));
    sleep(Duration::from_secs(1)).await;

    assert!(token.is_cancelled());
    assert_eq!(*listener.strategies.lock(), vec![ReloadStrategy::Shutdown]);
    running.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_denied_watch_degrades_to_polling() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));
    client.deny_watch(true);

    let running = start(reloading(WatchMode::Event, ReloadStrategy::Refresh), &client).await;
    sleep(Duration::from_millis(10)).await;
    assert!(running.health().is_degraded());

    client.apply(greeting_map("polled"));
    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(running.current_snapshot().get("greeting.message"), Some("polled"));
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dropped_subscription_degrades_to_polling() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));

    let running = start(reloading(WatchMode::Event, ReloadStrategy::Refresh), &client).await;
    sleep(Duration::from_millis(10)).await;
    assert!(running.health().is_healthy());

    client.close_watches();
    sleep(Duration::from_millis(10)).await;
    assert!(running.health().is_degraded());
    assert_eq!(client.watcher_count(), 0);
    running.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_denied_polling_disables_only_that_class() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));

    let running = start(reloading(WatchMode::Polling, ReloadStrategy::Refresh), &client).await;
    client.deny_get(true);
    sleep(Duration::from_millis(1_500)).await;

    let watcher = running.watcher(WatchClass::ConfigMaps).unwrap();
    assert!(watcher.is_finished());
    assert!(watcher.health().is_unhealthy());
    assert!(running.health().is_unhealthy());
    assert!(!running.cancellation_token().is_cancelled());
    assert_eq!(running.current_snapshot().get("greeting.message"), Some("hello"));
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reload_disabled_starts_no_watchers() {
    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(greeting_map("hello"));

    let running = start(properties(), &client).await;
    assert!(running.watcher_states().is_empty());
    assert!(running.health().is_healthy());
    running.shutdown().await.unwrap();
}
