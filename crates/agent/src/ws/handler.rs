/// Worker 消息处理器
///
/// 处理 Server 推送的通知，并为每条用户消息生成回复

use common::models::AgentIdentity;
use common::ws_rpc::{methods, AgentMessage, HumanInput, RpcError, RpcMessage};
use common::MessageType;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 生成 Worker 的回复内容
pub fn format_reply(name: &str, content: &str) -> String {
    format!("Message from {} - {}", name, content)
}

/// Worker 消息处理器
pub struct WorkerHandler {
    identity: AgentIdentity,
    /// 回复前的等待时间
    reply_delay: Duration,
}

impl WorkerHandler {
    pub fn new(identity: AgentIdentity, reply_delay: Duration) -> Self {
        Self {
            identity,
            reply_delay,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// 处理收到的消息，需要回送的消息写入 `tx`
    pub async fn handle_message(&self, msg: RpcMessage, tx: &mpsc::UnboundedSender<RpcMessage>) {
        debug!(
            "[{}] 收到消息: type={:?}, method={:?}",
            self.identity.agent_id, msg.message_type, msg.method
        );

        let outgoing = match msg.message_type {
            MessageType::Notification => match self.handle_notification(&msg).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("[{}] 处理通知失败: {}", self.identity.agent_id, e);
                    None
                }
            },
            MessageType::Request => Some(self.handle_request(&msg)),
            MessageType::Response => {
                debug!("[{}] 忽略响应: id={}", self.identity.agent_id, msg.id);
                None
            }
        };

        if let Some(outgoing) = outgoing {
            if tx.send(outgoing).is_err() {
                warn!("[{}] 连接已关闭，回复被丢弃", self.identity.agent_id);
            }
        }
    }

    /// 处理通知，返回需要回送的消息
    pub async fn handle_notification(&self, msg: &RpcMessage) -> Result<Option<RpcMessage>, RpcError> {
        match msg.method.as_deref() {
            Some(methods::HUMAN_INPUT) => {
                let input: HumanInput = msg.payload_as()?;
                info!(
                    "📥 [{}] 收到用户消息: from={}",
                    self.identity.name, input.username
                );

                if !self.reply_delay.is_zero() {
                    tokio::time::sleep(self.reply_delay).await;
                }

                let reply = AgentMessage {
                    message: format_reply(&self.identity.name, &input.content),
                };
                let outgoing = RpcMessage::notify_with(methods::AGENT_MESSAGE, &reply)?;
                info!("📤 [{}] 发送回复", self.identity.name);
                Ok(Some(outgoing))
            }
            other => {
                debug!("[{}] 未知的通知方法: {:?}", self.identity.agent_id, other);
                Ok(None)
            }
        }
    }

    /// Worker 不提供任何 RPC 方法，所有请求都返回错误响应
    pub fn handle_request(&self, msg: &RpcMessage) -> RpcMessage {
        let method = msg.method.clone().unwrap_or_default();
        warn!("[{}] 收到不支持的请求: {}", self.identity.agent_id, method);
        RpcMessage::error_response(msg.id.clone(), &RpcError::method_not_found(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RpcErrorCode;
    use serde_json::json;

    fn handler() -> WorkerHandler {
        WorkerHandler::new(AgentIdentity::new("worker_1", "Ada", "worker"), Duration::ZERO)
    }

    fn human_input(username: &str, content: &str) -> RpcMessage {
        RpcMessage::notify_with(
            methods::HUMAN_INPUT,
            &HumanInput {
                username: username.to_string(),
                content: content.to_string(),
                timestamp: Some(1.5),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_format_reply() {
        assert_eq!(format_reply("Ada", "hello"), "Message from Ada - hello");
        assert_eq!(format_reply("Ada", ""), "Message from Ada - ");
    }

    #[tokio::test]
    async fn test_human_input_gets_reply() {
        let reply = handler()
            .handle_notification(&human_input("Bob", "hi there"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.message_type, MessageType::Notification);
        assert_eq!(reply.method.as_deref(), Some(methods::AGENT_MESSAGE));
        let body: AgentMessage = reply.payload_as().unwrap();
        assert_eq!(body.message, "Message from Ada - hi there");
    }

    #[tokio::test]
    async fn test_reply_waits_for_delay() {
        let handler = WorkerHandler::new(
            AgentIdentity::new("worker_1", "Ada", "worker"),
            Duration::from_millis(50),
        );
        let started = std::time::Instant::now();
        handler
            .handle_notification(&human_input("Bob", "hi"))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_malformed_human_input_is_rejected() {
        let msg = RpcMessage::notification(methods::HUMAN_INPUT, json!({"content": 3}));
        let err = handler().handle_notification(&msg).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn test_unknown_notification_is_ignored() {
        // Server 不会向 Worker 发送心跳，Worker 也不处理
        let msg = RpcMessage::notification(methods::HEARTBEAT, json!({"timestamp": 1}));
        assert!(handler().handle_notification(&msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_is_answered_with_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = RpcMessage::request(methods::REGISTER, json!({"agent_id": "worker_9"}));
        handler().handle_message(request.clone(), &tx).await;

        let response = rx.try_recv().unwrap();
        assert_eq!(response.id, request.id);
        assert!(response.is_error());
        assert_eq!(response.error.unwrap().code, "METHOD_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_handle_message_sends_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler().handle_message(human_input("Bob", "ping"), &tx).await;

        let reply = rx.try_recv().unwrap();
        let body: AgentMessage = reply.payload_as().unwrap();
        assert_eq!(body.message, "Message from Ada - ping");
    }
}
