/// Agent Chat Relay - Server
///
/// 聊天中继服务器：聊天客户端 WebSocket、Agent 桥接 WebSocket 以及 Agent 管理 REST API

mod api;
mod app_state;
mod chat;
mod config;
mod models;
mod services;
mod ws;

use axum::{
    http::HeaderValue,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use crate::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 加载配置
    let cfg = config::Config::from_env()?;

    // 初始化日志（RUST_LOG 优先，其次 LOG_LEVEL）
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level))
        )
        .init();

    info!("🚀 启动 Agent Chat Relay Server...");
    info!("✅ 配置加载成功, Agent 数据文件: {}", cfg.agents_file.display());

    let server_port = cfg.server_port;
    let heartbeat_timeout = Duration::from_secs(cfg.agent_heartbeat_timeout_secs);
    let heartbeat_check = Duration::from_secs(cfg.agent_heartbeat_check_secs);

    // 设置CORS
    let cors = match cfg.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!("CORS_ORIGIN 无效 ({}), 允许所有来源: {}", cfg.cors_origin, e);
            CorsLayer::permissive()
        }
    };

    // 创建应用状态
    let app_state = AppState::new(cfg);

    // 启动 Agent 心跳监控
    let heartbeat_task = app_state
        .agent_manager()
        .start_heartbeat_monitor(heartbeat_timeout, heartbeat_check, app_state.relay());
    info!("✅ Agent 心跳监控任务已启动（{}秒超时检测）", heartbeat_timeout.as_secs());

    // 构建应用路由
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws::handle_frontend_websocket))
        .route("/ws/agent", get(ws::handle_agent_websocket))
        .nest("/api", api::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🎯 服务器监听在 http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    heartbeat_task.abort();
    info!("👋 服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("监听退出信号失败: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，正在关闭...");
}

async fn root_handler() -> &'static str {
    "Agent Chat Relay Server API v1"
}

async fn health_handler() -> &'static str {
    "OK"
}
