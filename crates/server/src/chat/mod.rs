/// 聊天中继模块
///
/// 连接注册表、在线状态通知、消息中继，以及通往 Agent 网络的桥接接口

pub mod bridge;
pub mod presence;
pub mod registry;
pub mod relay;

pub use bridge::{AgentBridge, BridgeError};
pub use relay::MessageRelay;
