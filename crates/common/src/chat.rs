/// 实时聊天通道协议
///
/// 每个 WebSocket 文本帧是一个事件：`{"event": <名称>, "data": <负载>}`，
/// 无负载的事件省略 `data` 字段。

use serde::{Deserialize, Serialize};

use crate::utils::now_timestamp;

/// 未设置用户名的连接在消息中显示的名称
pub const UNKNOWN_USERNAME: &str = "Unknown";

/// 聊天消息（只在一次广播期间存在，不做持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 发送者显示名
    pub username: String,

    /// 消息正文
    pub message: String,

    /// 服务端到达时间（秒，Unix 时间戳）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl ChatMessage {
    /// 创建带服务端时间戳的消息
    pub fn stamped(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            timestamp: Some(now_timestamp()),
        }
    }
}

/// 客户端 -> 服务端事件
///
/// `connect` / `disconnect` 由 WebSocket 连接的建立和关闭表示，不是帧。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// 设置显示名
    SetUsername(String),
    /// 发送聊天消息
    Message(String),
    /// 开始输入
    Typing,
    /// 停止输入
    StoppedTyping,
}

impl ClientEvent {
    /// 从 JSON 文本帧解析
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// 服务端 -> 客户端事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 当前在线连接数
    UsersCount { count: usize },
    /// 有用户（或 Agent）加入
    UserJoined { username: String },
    /// 有用户（或 Agent）离开
    UserLeft { username: String },
    /// 聊天消息
    Response(ChatMessage),
    /// 有用户正在输入
    UserTyping { username: String },
    /// 有用户停止输入（无负载）
    UserStoppedTyping,
}

impl ServerEvent {
    /// 序列化为 JSON 文本帧
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
