/// Agent Chat Relay - 公共库
///
/// 提供 Server 和 Agent 共享的聊天协议、Agent 桥接协议、错误处理、工具函数等

pub mod chat;
pub mod errors;
pub mod models;
pub mod utils;
pub mod ws_rpc;

// 重新导出常用类型
pub use chat::{ChatMessage, ClientEvent, ServerEvent};
pub use errors::{Error, Result};
pub use ws_rpc::{RpcMessage, RpcError, RpcErrorCode, MessageType};
