//! LIS服务器主程序

mod settings;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lis_database::{DatabasePool, InMemoryStore, LabStore, PgLabStore};
use lis_web::WebServer;
use lis_workflow::{LogDispatcher, NotificationDispatcher, WebhookDispatcher, WorkflowEngine};
use tracing::{error, info, warn};

use crate::settings::LisConfig;

/// LIS服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "lis-server")]
#[command(about = "LIS (Laboratory Information System) 服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 数据库连接地址，不设置时使用内存存储
    #[arg(long)]
    database_url: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    /// 命令行参数覆盖配置文件和环境变量
    fn apply(self, config: &mut LisConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.database_url {
            config.database.url = Some(url);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LisConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.as_str())
        .init();

    info!("启动LIS服务器...");

    let store = open_store(&config).await?;
    let notifier = build_notifier(&config)?;
    let engine = WorkflowEngine::new(store, notifier)
        .with_critical_recipients(config.notifications.critical_recipients.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.host))?;

    info!("LIS服务器配置:");
    info!("  监听地址: {}", addr);
    info!(
        "  存储: {}",
        if config.database.url.is_some() { "postgresql" } else { "memory" }
    );

    if let Err(e) = WebServer::new(addr, Arc::new(engine)).run().await {
        error!("服务器启动失败: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn open_store(config: &LisConfig) -> anyhow::Result<Arc<dyn LabStore>> {
    match &config.database.url {
        Some(url) => {
            let pool = DatabasePool::connect(
                url,
                config.database.max_connections,
                config.database.acquire_timeout(),
            )
            .await
            .context("failed to connect to database")?;
            let store = PgLabStore::new(pool);
            store.create_tables().await?;
            info!("Database schema ready");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, data will be kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

fn build_notifier(config: &LisConfig) -> anyhow::Result<Arc<dyn NotificationDispatcher>> {
    let notifications = &config.notifications;
    match &notifications.webhook_url {
        Some(url) => {
            info!("Notifications delivered via webhook {}", url);
            let dispatcher = WebhookDispatcher::new(
                url.clone(),
                notifications.webhook_secret.clone(),
                notifications.timeout(),
            )?;
            Ok(Arc::new(dispatcher))
        }
        None => {
            info!("No webhook configured, notifications will be logged");
            Ok(Arc::new(LogDispatcher))
        }
    }
}
