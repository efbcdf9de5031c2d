/// Agent Chat Relay - Agent
///
/// Worker 运行时：加载 Worker 名单，每个 Worker 连接 Server 的 Agent 桥接端点并回复用户消息

use tracing::{info, warn};

mod config;
mod worker;
mod ws;

use worker::{RestartPolicy, WorkerSupervisor};
use ws::{WorkerClient, WorkerHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenvy::dotenv().ok();
    let cfg = config::Config::from_env()?;

    // 初始化日志
    // 可以通过环境变量 RUST_LOG 设置日志级别，例如：
    // RUST_LOG=agent=debug cargo run --bin agent
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动 Agent Chat Relay Worker...");
    info!("✅ 配置加载成功");

    // 加载 Worker 名单
    let http = reqwest::Client::new();
    let roster = worker::initialize_workers(&http, &cfg.server_http_url).await;

    let policy = RestartPolicy::new(cfg.reconnect_interval(), cfg.max_restarts);
    let mut supervisor = WorkerSupervisor::new(policy);

    info!("🎯 连接到 Server: {}", cfg.server_ws_url);
    for identity in roster {
        let handler = WorkerHandler::new(identity, cfg.reply_delay());
        let client = WorkerClient::new(cfg.server_ws_url.clone(), handler, cfg.heartbeat_interval());
        supervisor.spawn(client);
    }
    info!("📌 已启动 {} 个 Worker", supervisor.len());

    // Ctrl-C 取消所有 Worker
    let cancel = supervisor.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("收到退出信号，正在停止所有 Worker...");
                cancel.cancel();
            }
            Err(e) => warn!("监听退出信号失败: {}", e),
        }
    });

    let exits = supervisor.wait().await;
    info!("👋 所有 Worker 已退出 ({})", exits.len());

    Ok(())
}
