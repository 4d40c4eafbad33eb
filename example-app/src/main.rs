//! # 示例应用程序
//!
//! 用内存集群客户端演示配置聚合与热重载：启动时按 profile 合并多文档 YAML，
//! 可选地周期性修改 ConfigMap，观察刷新作用域重新绑定。

use clap::Parser;
use config_abstractions::{ReloadListener, SnapshotDiff};
use config_impl::{
    load_settings, CallbackBinding, ConfigReloadController, InMemoryResourceClient,
    DEFAULT_ENV_PREFIX,
};
use infrastructure_common::{
    ClusterConfigProperties, HealthStatus, RawResource, ReloadStrategy, ResourceKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

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

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "example-app")]
#[command(about = "集群配置热重载示例应用")]
struct Args {
    /// 启动配置文件路径（YAML / TOML / JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 激活的 profile，逗号分隔，覆盖配置文件中的设置
    #[arg(short, long, value_delimiter = ',')]
    profile: Vec<String>,

    /// 环境变量前缀
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    env_prefix: String,

    /// 启用热重载
    #[arg(long)]
    reload: bool,

    /// 每隔若干秒修改一次 ConfigMap，0 表示不修改
    #[arg(long, default_value_t = 0)]
    update_every: u64,

    /// 启动后以 JSON 打印有效快照
    #[arg(long)]
    print_snapshot: bool,

    /// 日志级别（支持 EnvFilter 语法）
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 输出 JSON 格式日志
    #[arg(long)]
    json_logs: bool,
}

/// 把每次重载打印到日志
struct ConsoleListener;

impl ReloadListener for ConsoleListener {
    fn on_reload(&self, strategy: ReloadStrategy, diff: &SnapshotDiff) {
        let keys: Vec<String> = diff.changed_keys().into_iter().collect();
        info!("配置已重载（{}）: {}", strategy.as_str(), keys.join(", "));
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("启动配置热重载示例应用");

    let mut properties = load_settings(args.config.as_deref(), &args.env_prefix)?;
    if !args.profile.is_empty() {
        properties.active_profiles = args.profile.clone();
    }
    if args.reload {
        properties.reload.enabled = true;
    }
    info!(
        "应用 {}，命名空间 {}，profile {:?}",
        properties.application_name, properties.namespace, properties.active_profiles
    );

    let client = Arc::new(InMemoryResourceClient::new());
    client.apply(seed_config_map(&properties, APPLICATION_YAML));

    let running = ConfigReloadController::builder(properties.clone())
        .with_client(client.clone())
        .with_listener(Arc::new(ConsoleListener))
        .start()
        .await?;

    running.bind(Arc::new(CallbackBinding::new("greeting", "greeting", |section| {
        match section.get("greeting.message") {
            Some(message) => info!("greeting.message = {}", message),
            None => warn!("greeting.message 未配置"),
        }
        Ok(())
    })))?;

    if args.print_snapshot {
        let snapshot = running.current_snapshot();
        println!("{}", serde_json::to_string_pretty(snapshot.as_map())?);
    }

    report_health(running.health());

    if args.update_every > 0 {
        let client = client.clone();
        let properties = properties.clone();
        let period = Duration::from_secs(args.update_every);
        tokio::spawn(async move {
            let mut revision = 0u64;
            loop {
                tokio::time::sleep(period).await;
                revision += 1;
                let yaml = APPLICATION_YAML.replacen(
                    "Say Hello to the World",
                    &format!("Say Hello to the World #{}", revision),
                    1,
                );
                info!("修改 ConfigMap，第 {} 次", revision);
                client.apply(seed_config_map(&properties, &yaml));
            }
        });
    }

    let token = running.cancellation_token();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("收到退出信号，正在关闭应用");
        }
        _ = token.cancelled() => {
            info!("收到进程终止请求，正在关闭应用");
        }
    }

    report_health(running.health());
    running.shutdown().await?;

    info!("应用已关闭");
    Ok(())
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&args.log_level)?;
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn seed_config_map(properties: &ClusterConfigProperties, yaml: &str) -> RawResource {
    RawResource::new(
        ResourceKind::ConfigMap,
        properties.source_name(ResourceKind::ConfigMap),
        properties.source_namespace(ResourceKind::ConfigMap),
    )
    .with_entry("application.yml", yaml.as_bytes().to_vec())
}

fn report_health(status: HealthStatus) {
    match status {
        HealthStatus::Healthy => info!("配置监控健康"),
        HealthStatus::Degraded { message, .. } => warn!("配置监控降级: {}", message),
        HealthStatus::Unhealthy { error, .. } => error!("配置监控不健康: {}", error),
    }
}
