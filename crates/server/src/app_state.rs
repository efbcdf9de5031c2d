/// 应用全局状态

use std::sync::Arc;

use crate::chat::MessageRelay;
use crate::config::Config;
use crate::ws::AgentConnectionManager;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 配置
    pub config: Arc<Config>,
    /// Agent WebSocket 连接管理器（同时是聊天中继的 Agent 桥接）
    pub agent_manager: AgentConnectionManager,
    /// 聊天消息中继
    pub relay: MessageRelay,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let agent_manager = AgentConnectionManager::new();
        let relay = MessageRelay::new(Arc::new(agent_manager.clone()));

        Self {
            config: Arc::new(config),
            agent_manager,
            relay,
        }
    }

    /// 获取 Agent 连接管理器
    pub fn agent_manager(&self) -> AgentConnectionManager {
        self.agent_manager.clone()
    }

    /// 获取聊天消息中继
    pub fn relay(&self) -> MessageRelay {
        self.relay.clone()
    }
}
