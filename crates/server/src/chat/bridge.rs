/// Agent 桥接接口
///
/// 聊天中继向 Agent 网络转发消息的出口。转发是尽力而为的：
/// 失败只记录日志，不影响已经完成的客户端广播。

use async_trait::async_trait;
use common::{ChatMessage, RpcError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("没有在线的 Agent")]
    NoAgents,

    #[error("向 Agent {agent_id} 转发失败: {source}")]
    Delivery {
        agent_id: String,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[async_trait]
pub trait AgentBridge: Send + Sync {
    /// 把一条已广播的聊天消息转发给 Agent 网络，返回送达的 Agent 数量
    async fn forward_to_agents(&self, message: &ChatMessage) -> Result<usize, BridgeError>;
}
