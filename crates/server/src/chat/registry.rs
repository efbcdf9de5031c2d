/// 连接注册表
///
/// 记录所有在线的聊天连接及其显示名，以及已上线 Agent 的显示名。
/// 每个变更操作返回应当广播的在线状态事件。注册表本身不加锁，
/// 由 [`super::MessageRelay`] 在写锁内调用。

use chrono::{DateTime, Utc};
use common::chat::UNKNOWN_USERNAME;
use common::ServerEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::presence::{self, PresenceEvent};

/// 连接 ID（每个 WebSocket 会话唯一）
pub type ConnectionId = String;

/// 聊天连接信息
#[derive(Debug)]
pub struct Connection {
    /// 显示名（`set_username` 之前为空）
    pub name: Option<String>,

    /// 是否正在输入
    pub typing: bool,

    /// 发送事件的通道
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// connection_id -> Connection
    connections: HashMap<ConnectionId, Connection>,

    /// agent_id -> 显示名（不计入在线人数）
    agents: HashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新连接，已存在时不做任何事
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Vec<PresenceEvent> {
        if self.connections.contains_key(&connection_id) {
            debug!("连接已注册，忽略: {}", connection_id);
            return Vec::new();
        }

        self.connections.insert(
            connection_id,
            Connection {
                name: None,
                typing: false,
                sender,
                connected_at: Utc::now(),
            },
        );

        presence::registered(self.connections.len())
    }

    /// 注销连接，未知连接不做任何事
    pub fn unregister(&mut self, connection_id: &str) -> Vec<PresenceEvent> {
        match self.connections.remove(connection_id) {
            Some(conn) => {
                let online = Utc::now() - conn.connected_at;
                debug!("连接 {} 在线 {} 秒", connection_id, online.num_seconds());
                presence::unregistered(conn.name, conn.typing, self.connections.len())
            }
            None => {
                debug!("注销未知连接，忽略: {}", connection_id);
                Vec::new()
            }
        }
    }

    /// 绑定显示名，覆盖之前的绑定
    ///
    /// 不校验唯一性，也不拒绝空字符串。
    pub fn bind_name(&mut self, connection_id: &str, name: impl Into<String>) -> Vec<PresenceEvent> {
        let name = name.into();
        match self.connections.get_mut(connection_id) {
            Some(conn) => {
                conn.name = Some(name.clone());
                presence::name_bound(name)
            }
            None => {
                warn!("为不存在的连接设置用户名，忽略: {}", connection_id);
                Vec::new()
            }
        }
    }

    /// 获取显示名，未绑定时返回 "Unknown"
    pub fn name_of(&self, connection_id: &str) -> &str {
        self.connections
            .get(connection_id)
            .and_then(|conn| conn.name.as_deref())
            .or_else(|| self.agents.get(connection_id).map(String::as_str))
            .unwrap_or(UNKNOWN_USERNAME)
    }

    /// 切换输入状态，只在状态变化时产生事件
    ///
    /// 没有显示名的连接不广播输入状态。
    pub fn set_typing(&mut self, connection_id: &str, is_typing: bool) -> Vec<PresenceEvent> {
        let Some(conn) = self.connections.get_mut(connection_id) else {
            return Vec::new();
        };
        let Some(name) = conn.name.clone() else {
            debug!("未设置用户名的连接的输入状态被忽略: {}", connection_id);
            return Vec::new();
        };
        if conn.typing == is_typing {
            return Vec::new();
        }

        conn.typing = is_typing;
        presence::typing_changed(name, is_typing)
    }

    /// 记录已上线的 Agent
    pub fn bind_agent(&mut self, agent_id: impl Into<String>, name: impl Into<String>) -> Vec<PresenceEvent> {
        let name = name.into();
        self.agents.insert(agent_id.into(), name.clone());
        presence::name_bound(name)
    }

    /// 移除下线的 Agent
    pub fn unbind_agent(&mut self, agent_id: &str) -> Vec<PresenceEvent> {
        match self.agents.remove(agent_id) {
            Some(name) => presence::name_released(name),
            None => Vec::new(),
        }
    }

    /// 在线连接数量
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// 向所有连接广播事件，返回成功投递的连接数
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut count = 0;

        for (connection_id, conn) in self.connections.iter() {
            if let Err(e) = conn.sender.send(event.clone()) {
                warn!("向聊天连接 {} 发送事件失败: {}", connection_id, e);
            } else {
                count += 1;
            }
        }

        debug!("事件已广播到 {} 个聊天连接", count);
        count
    }
}
