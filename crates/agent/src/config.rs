/// 配置管理

use common::models::constants::DEFAULT_HEARTBEAT_INTERVAL;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Agent 管理 API 地址（用于加载 Worker 名单）
    pub server_http_url: String,
    /// Agent 桥接 WebSocket 地址
    pub server_ws_url: String,
    /// 回复延迟（毫秒）
    pub reply_delay_ms: u64,
    pub heartbeat_interval: u64,
    /// 断线重连间隔（秒）
    pub reconnect_interval: u64,
    /// 最大重启次数，未设置时无限重启
    pub max_restarts: Option<u32>,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let server_http_url = lookup("SERVER_HTTP_URL")
            .unwrap_or_else(|| "http://localhost:8000".to_string());

        let server_ws_url = lookup("SERVER_WS_URL")
            .unwrap_or_else(|| "ws://localhost:8000/ws/agent".to_string());

        let reply_delay_ms = lookup("REPLY_DELAY_MS")
            .unwrap_or_else(|| "2000".to_string())
            .parse()?;

        let heartbeat_interval = match lookup("HEARTBEAT_INTERVAL") {
            Some(value) => value.parse()?,
            None => DEFAULT_HEARTBEAT_INTERVAL,
        };
        anyhow::ensure!(heartbeat_interval > 0, "HEARTBEAT_INTERVAL 必须大于 0");

        let reconnect_interval = lookup("RECONNECT_INTERVAL")
            .unwrap_or_else(|| "5".to_string())
            .parse()?;

        let max_restarts = lookup("MAX_RESTARTS")
            .map(|value| value.parse())
            .transpose()?;

        let log_level = lookup("LOG_LEVEL")
            .unwrap_or_else(|| "debug".to_string());

        Ok(Self {
            server_http_url,
            server_ws_url,
            reply_delay_ms,
            heartbeat_interval,
            reconnect_interval,
            max_restarts,
            log_level,
        })
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}
