/// 聊天客户端 WebSocket 连接处理器
///
/// 连接建立即 `connect`，连接关闭即 `disconnect`；其余事件以 JSON 文本帧传输

use axum::extract::ws::{Message as AxumWsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use common::{utils, ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::chat::MessageRelay;

/// 聊天事件处理错误（记录日志后丢弃该事件）
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("无法解析的聊天事件: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("二进制帧不是有效的 UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("发送 WebSocket 消息失败: {0}")]
    Send(String),
}

/// WebSocket 升级处理器
pub async fn handle_frontend_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_frontend_connection(socket, state.relay()))
}

/// 处理聊天客户端 WebSocket 连接
async fn handle_frontend_connection(socket: WebSocket, relay: MessageRelay) {
    let connection_id = utils::generate_id();
    info!("新的聊天 WebSocket 连接: {}", connection_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // 创建事件发送通道
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // 注册到中继（会广播在线人数）
    relay.connect(connection_id.clone(), tx).await;

    // 创建事件发送任务
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = send_frontend_event(&mut ws_sender, &event).await {
                error!("发送聊天事件失败: {}", e);
                break;
            }
        }
        debug!("聊天事件发送任务结束");
    });

    // 创建事件接收任务
    let relay_clone = relay.clone();
    let connection_clone = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(AxumWsMessage::Close(_)) => {
                    debug!("聊天客户端关闭连接: {}", connection_clone);
                    break;
                }
                Ok(msg) => {
                    if let Err(e) = handle_frontend_incoming_message(msg, &connection_clone, &relay_clone).await {
                        warn!("丢弃聊天事件 ({}): {}", connection_clone, e);
                    }
                }
                Err(e) => {
                    error!("接收聊天消息错误: {}", e);
                    break;
                }
            }
        }
        debug!("聊天事件接收任务结束");
    });

    // 等待任一任务完成
    tokio::select! {
        _ = &mut send_task => {
            debug!("聊天发送任务已结束");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("聊天接收任务已结束");
            send_task.abort();
        }
    }

    // 清理：注销连接（会广播离开和在线人数）
    relay.disconnect(&connection_id).await;
    info!("聊天连接已关闭: {}", connection_id);
}

/// 处理收到的聊天消息
async fn handle_frontend_incoming_message(
    ws_msg: AxumWsMessage,
    connection_id: &str,
    relay: &MessageRelay,
) -> Result<(), FrontendError> {
    let text = match ws_msg {
        AxumWsMessage::Text(text) => text,
        AxumWsMessage::Binary(data) => String::from_utf8(data)?,
        _ => {
            debug!("忽略控制帧 ({})", connection_id);
            return Ok(());
        }
    };

    dispatch_event(ClientEvent::from_json(&text)?, connection_id, relay).await;
    Ok(())
}

/// 把客户端事件分发给中继
async fn dispatch_event(event: ClientEvent, connection_id: &str, relay: &MessageRelay) {
    match event {
        ClientEvent::SetUsername(name) => relay.set_username(connection_id, name).await,
        ClientEvent::Message(body) => {
            relay.relay(connection_id, body).await;
        }
        ClientEvent::Typing => relay.relay_typing(connection_id, true).await,
        ClientEvent::StoppedTyping => relay.relay_typing(connection_id, false).await,
    }
}

/// 发送聊天事件
async fn send_frontend_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, AxumWsMessage>,
    event: &ServerEvent,
) -> Result<(), FrontendError> {
    let json = event.to_json()?;

    sender
        .send(AxumWsMessage::Text(json))
        .await
        .map_err(|e| FrontendError::Send(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::AgentConnectionManager;
    use std::sync::Arc;

    fn relay() -> MessageRelay {
        MessageRelay::new(Arc::new(AgentConnectionManager::new()))
    }

    #[tokio::test]
    async fn test_frames_are_dispatched_to_relay() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::UsersCount { count: 1 });

        let frame = AxumWsMessage::Text(r#"{"event":"set_username","data":"Bob"}"#.into());
        handle_frontend_incoming_message(frame, "A", &relay).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::UserJoined { username: "Bob".into() });

        let frame = AxumWsMessage::Binary(br#"{"event":"message","data":"hello"}"#.to_vec());
        handle_frontend_incoming_message(frame, "A", &relay).await.unwrap();
        match rx.try_recv().unwrap() {
            ServerEvent::Response(message) => {
                assert_eq!(message.username, "Bob");
                assert_eq!(message.message, "hello");
            }
            other => panic!("期望 response 事件，实际: {:?}", other),
        }

        let frame = AxumWsMessage::Text(r#"{"event":"typing"}"#.into());
        handle_frontend_incoming_message(frame, "A", &relay).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::UserTyping { username: "Bob".into() });
    }

    #[tokio::test]
    async fn test_malformed_frames_are_rejected_without_side_effects() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        rx.try_recv().unwrap();

        for frame in [
            AxumWsMessage::Text("hello".into()),
            AxumWsMessage::Text(r#"{"event":"message","data":{"nested":true}}"#.into()),
            AxumWsMessage::Binary(vec![0xc3, 0x28]),
        ] {
            assert!(handle_frontend_incoming_message(frame, "A", &relay).await.is_err());
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(relay.count().await, 1);
    }

    #[tokio::test]
    async fn test_control_frames_are_ignored() {
        let relay = relay();
        let frame = AxumWsMessage::Ping(vec![1, 2, 3]);
        assert!(handle_frontend_incoming_message(frame, "A", &relay).await.is_ok());
    }
}
