/// Agent 桥接 RPC 数据类型定义

use serde::{Deserialize, Serialize};

use crate::models::AgentIdentity;

/// 方法名
pub mod methods {
    /// Agent -> Server：注册（请求，连接后的第一帧）
    pub const REGISTER: &str = "register";
    /// Agent -> Server：心跳（通知）
    pub const HEARTBEAT: &str = "heartbeat";
    /// Agent -> Server：Agent 发言（通知）
    pub const AGENT_MESSAGE: &str = "agent_message";
    /// Server -> Agent：转发的用户消息（通知）
    pub const HUMAN_INPUT: &str = "human_input";
}

// ============================================================================
// 注册
// ============================================================================

pub type RegisterRequest = AgentIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
}

// ============================================================================
// 心跳
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: i64,
}

// ============================================================================
// 消息转发
// ============================================================================

/// 转发给 Agent 网络的用户消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInput {
    pub username: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl From<&crate::chat::ChatMessage> for HumanInput {
    fn from(message: &crate::chat::ChatMessage) -> Self {
        Self {
            username: message.username.clone(),
            content: message.message.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Agent 产生的消息，由 Server 以 Agent 名义广播
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    #[test]
    fn test_human_input_from_chat_message() {
        let chat = ChatMessage::stamped("Bob", "hello");
        let input = HumanInput::from(&chat);
        assert_eq!(input.username, "Bob");
        assert_eq!(input.content, "hello");
        assert_eq!(input.timestamp, chat.timestamp);
    }
}
