/// Agent 连接管理器
///
/// 负责管理所有 Agent 的 WebSocket 连接，并作为聊天中继通往 Agent 网络的桥接

use async_trait::async_trait;
use common::models::AgentIdentity;
use common::ws_rpc::{methods, HumanInput, RpcError, RpcMessage};
use common::ChatMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::{AgentBridge, BridgeError, MessageRelay};

/// Agent 连接信息
pub struct AgentConnection {
    /// Agent 身份
    pub identity: AgentIdentity,

    /// 本次连接的会话 ID（同一 Agent 重连后会变化）
    pub session_id: String,

    /// 发送消息的通道
    pub sender: mpsc::UnboundedSender<RpcMessage>,

    /// 最后心跳时间
    pub last_heartbeat: Arc<RwLock<Instant>>,

    /// 会话被注销、超时清理或被新会话替换时取消
    closed: CancellationToken,
}

impl AgentConnection {
    pub fn agent_id(&self) -> &str {
        &self.identity.agent_id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// 发送通知
    pub fn notify(&self, message: RpcMessage) -> Result<(), RpcError> {
        self.sender
            .send(message)
            .map_err(|_| RpcError::connection_closed())
    }

    /// 结束会话，连接处理器随之断开 WebSocket
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 等待会话结束
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// 更新最后心跳时间
    pub async fn update_heartbeat(&self) {
        let mut last_heartbeat = self.last_heartbeat.write().await;
        *last_heartbeat = Instant::now();
    }

    /// 获取距离上次心跳的时间
    pub async fn heartbeat_elapsed(&self) -> Duration {
        let last_heartbeat = self.last_heartbeat.read().await;
        last_heartbeat.elapsed()
    }
}

/// Agent 连接管理器
#[derive(Clone)]
pub struct AgentConnectionManager {
    /// 所有连接的映射：agent_id -> AgentConnection
    connections: Arc<RwLock<HashMap<String, Arc<AgentConnection>>>>,
}

impl AgentConnectionManager {
    /// 创建新的连接管理器
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 注册新的 Agent 连接
    ///
    /// 同一 agent_id 再次注册时替换旧连接。
    pub async fn register(
        &self,
        identity: AgentIdentity,
        sender: mpsc::UnboundedSender<RpcMessage>,
    ) -> Arc<AgentConnection> {
        let connection = Arc::new(AgentConnection {
            identity,
            session_id: Uuid::new_v4().to_string(),
            sender,
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
            closed: CancellationToken::new(),
        });

        let mut connections = self.connections.write().await;
        if let Some(old) = connections.insert(connection.agent_id().to_string(), connection.clone()) {
            warn!("Agent {} 重复注册，旧连接已被替换", connection.agent_id());
            old.close();
        }

        info!("Agent 已注册: {} ({})", connection.agent_id(), connection.name());
        connection
    }

    /// 注销 Agent 连接
    ///
    /// 只移除与 session_id 匹配的连接，避免旧会话的清理误删重连后的新会话。
    pub async fn unregister(&self, agent_id: &str, session_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let matches = connections
            .get(agent_id)
            .is_some_and(|conn| conn.session_id == session_id);

        if matches {
            if let Some(conn) = connections.remove(agent_id) {
                conn.close();
            }
            info!("Agent 已注销: {}", agent_id);
        }
        matches
    }

    /// 获取指定 Agent 的连接
    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentConnection>> {
        let connections = self.connections.read().await;
        connections.get(agent_id).cloned()
    }

    /// 获取在线 Agent 数量
    #[cfg(test)]
    pub async fn count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// 清理心跳超时的连接，返回被清理的 Agent 身份
    pub async fn cleanup_timeout_connections(&self, timeout: Duration) -> Vec<AgentIdentity> {
        let mut to_remove = Vec::new();

        {
            let connections = self.connections.read().await;
            for (agent_id, conn) in connections.iter() {
                let elapsed = conn.heartbeat_elapsed().await;
                if elapsed > timeout {
                    warn!("Agent 心跳超时: {} ({}秒)", agent_id, elapsed.as_secs());
                    to_remove.push(agent_id.clone());
                }
            }
        }

        let mut removed = Vec::new();
        if !to_remove.is_empty() {
            let mut connections = self.connections.write().await;
            for agent_id in &to_remove {
                if let Some(conn) = connections.remove(agent_id) {
                    conn.close();
                    info!("已清理超时 Agent: {}", agent_id);
                    removed.push(conn.identity.clone());
                }
            }
        }

        removed
    }

    /// 向所有 Agent 广播通知，返回成功投递的数量
    pub async fn broadcast(&self, message: RpcMessage) -> Result<usize, BridgeError> {
        let connections = self.connections.read().await;
        if connections.is_empty() {
            return Err(BridgeError::NoAgents);
        }

        let mut count = 0;
        let mut first_failure = None;

        for (agent_id, conn) in connections.iter() {
            match conn.notify(message.clone()) {
                Ok(()) => count += 1,
                Err(e) => {
                    warn!("向 Agent {} 发送通知失败: {}", agent_id, e);
                    first_failure.get_or_insert((agent_id.clone(), e));
                }
            }
        }

        debug!("通知已发送到 {} 个 Agent", count);

        match (count, first_failure) {
            (0, Some((agent_id, source))) => Err(BridgeError::Delivery { agent_id, source }),
            _ => Ok(count),
        }
    }

    /// 启动心跳超时检查任务，被清理的 Agent 会在聊天中广播离开
    pub fn start_heartbeat_monitor(
        self,
        timeout: Duration,
        check_interval: Duration,
        relay: MessageRelay,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);

            loop {
                interval.tick().await;

                let removed = self.cleanup_timeout_connections(timeout).await;
                if removed.is_empty() {
                    continue;
                }

                warn!("心跳监控: 清理了 {} 个超时 Agent", removed.len());
                for identity in removed {
                    relay.agent_disconnected(&identity.agent_id).await;
                }
            }
        })
    }
}

impl Default for AgentConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBridge for AgentConnectionManager {
    async fn forward_to_agents(&self, message: &ChatMessage) -> Result<usize, BridgeError> {
        let notification = RpcMessage::notify_with(methods::HUMAN_INPUT, &HumanInput::from(message))
            .map_err(|e| {
                error!("构造 human_input 通知失败: {}", e);
                BridgeError::Rpc(e)
            })?;

        info!("📤 [Server -> Agent] 转发消息: from={}", message.username);
        self.broadcast(notification).await
    }
}
