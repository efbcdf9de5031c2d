/// Agent 桥接 RPC 模块
///
/// Server 与 Agent 之间基于 WebSocket 的 JSON 消息协议

pub mod message;
pub mod error;
pub mod types;

pub use message::{RpcMessage, MessageType};
pub use error::{RpcError, RpcErrorCode};
pub use types::*;
