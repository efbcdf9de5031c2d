/// Agent WebSocket 连接处理器
///
/// 处理 Agent 的注册、心跳和发言，把 Agent 的消息交给聊天中继广播

use super::agent_manager::{AgentConnection, AgentConnectionManager};
use axum::extract::ws::{Message as AxumWsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use common::ws_rpc::{methods, AgentMessage, RegisterRequest, RegisterResponse, RpcError};
use common::{MessageType, RpcMessage};
use futures_util::{SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::chat::MessageRelay;

/// 等待注册消息的超时时间
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket 升级处理器
pub async fn handle_agent_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_connection(socket, state))
}

/// 处理 Agent WebSocket 连接
async fn handle_agent_connection(socket: WebSocket, state: AppState) {
    info!("新的 Agent WebSocket 连接");

    let manager = state.agent_manager();
    let relay = state.relay();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // 创建消息发送通道
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcMessage>();

    // 等待注册消息
    let (request_id, identity) = match wait_for_registration(&mut ws_receiver, REGISTRATION_TIMEOUT).await {
        Ok(registration) => registration,
        Err((request_id, e)) => {
            error!("Agent 注册失败: {}", e);
            let reply_id = request_id.unwrap_or_else(|| methods::REGISTER.to_string());
            let _ = send_message(&mut ws_sender, RpcMessage::error_response(reply_id, &e)).await;
            let _ = ws_sender.close().await;
            return;
        }
    };

    // 发送注册成功响应
    let register_response = RegisterResponse {
        success: true,
        message: "注册成功".to_string(),
    };
    let response_msg = match serde_json::to_value(&register_response) {
        Ok(payload) => RpcMessage::response(request_id, payload),
        Err(e) => {
            error!("序列化注册响应失败: {}", e);
            return;
        }
    };
    if let Err(e) = send_message(&mut ws_sender, response_msg).await {
        error!("发送注册响应失败: {}", e);
        return;
    }

    // 注册到管理器
    let connection = manager.register(identity, tx).await;
    let agent_id = connection.agent_id().to_string();
    let session_id = connection.session_id.clone();

    // 等 Agent 完全就绪后再在聊天中公告
    announce_after_settle(
        manager.clone(),
        relay.clone(),
        connection.clone(),
        state.config.agent_settle_delay(),
    );

    // 创建消息发送任务
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_message(&mut ws_sender, msg).await {
                error!("发送 Agent 消息失败: {}", e);
                break;
            }
        }
        debug!("Agent 消息发送任务结束");
    });

    // 创建消息接收任务
    let connection_clone = connection.clone();
    let relay_clone = relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(AxumWsMessage::Close(_)) => {
                    debug!("Agent 主动关闭连接");
                    break;
                }
                Ok(msg) => {
                    if let Err(e) = handle_incoming_message(msg, &connection_clone, &relay_clone).await {
                        warn!("处理 Agent 消息失败: {}", e);
                    }
                }
                Err(e) => {
                    error!("接收 Agent 消息错误: {}", e);
                    break;
                }
            }
        }
        debug!("Agent 消息接收任务结束");
    });

    // 等待任一任务完成
    tokio::select! {
        _ = &mut send_task => {
            debug!("Agent 发送任务已结束");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("Agent 接收任务已结束");
            send_task.abort();
        }
        _ = connection.closed() => {
            warn!("Agent {} 会话已结束（心跳超时或被新会话替换），断开连接", agent_id);
            send_task.abort();
            recv_task.abort();
        }
    }

    // 清理：从管理器中注销，并在聊天中广播离开
    if manager.unregister(&agent_id, &session_id).await {
        relay.agent_disconnected(&agent_id).await;
    }
    info!("Agent 连接已关闭: {}", agent_id);
}

/// 延迟后公告 Agent 上线
///
/// 延迟期间连接已断开或被新会话替换时不公告。会话检查在聊天中继的写锁内进行。
fn announce_after_settle(
    manager: AgentConnectionManager,
    relay: MessageRelay,
    connection: Arc<AgentConnection>,
    settle_delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(settle_delay).await;

        let still_current = async {
            !connection.is_closed()
                && manager
                    .get(connection.agent_id())
                    .await
                    .is_some_and(|current| current.session_id == connection.session_id)
        };

        let announced = relay
            .agent_connected(connection.agent_id(), connection.name(), still_current)
            .await;
        if !announced {
            debug!("Agent {} 在公告前已断开，跳过公告", connection.agent_id());
        }
    })
}

/// 注册失败：能解析出消息 ID 时附带该 ID，错误响应沿用它
type RegistrationFailure = (Option<String>, RpcError);

/// 等待并解析注册消息，返回请求 ID 和 Agent 身份
async fn wait_for_registration<S, E>(
    receiver: &mut S,
    timeout: Duration,
) -> Result<(String, RegisterRequest), RegistrationFailure>
where
    S: Stream<Item = Result<AxumWsMessage, E>> + Unpin,
    E: Display,
{
    // 等待第一条消息（应该是注册请求）
    let msg = match tokio::time::timeout(timeout, receiver.next()).await {
        Ok(Some(Ok(msg))) => msg,
        Ok(Some(Err(e))) => {
            return Err((None, RpcError::invalid_request(format!("接收注册消息错误: {}", e))));
        }
        Ok(None) => return Err((None, RpcError::connection_closed())),
        Err(_) => return Err((None, RpcError::timeout("等待注册消息超时"))),
    };

    let rpc_msg = parse_websocket_message(msg).map_err(|e| (None, e))?;
    let request_id = Some(rpc_msg.id.clone());

    // 验证是否是注册请求
    if rpc_msg.message_type != MessageType::Request {
        return Err((request_id, RpcError::invalid_request("期望收到注册请求")));
    }
    if rpc_msg.method.as_deref() != Some(methods::REGISTER) {
        return Err((
            request_id,
            RpcError::invalid_request(format!("期望 register 方法，收到: {:?}", rpc_msg.method)),
        ));
    }

    let identity: RegisterRequest = rpc_msg.payload_as().map_err(|e| (request_id, e))?;
    info!(
        "收到 Agent 注册: agent_id={}, name={}, role={}",
        identity.agent_id, identity.name, identity.role
    );
    Ok((rpc_msg.id, identity))
}

/// 处理收到的消息
async fn handle_incoming_message(
    ws_msg: AxumWsMessage,
    connection: &AgentConnection,
    relay: &MessageRelay,
) -> Result<(), RpcError> {
    if connection.is_closed() {
        return Err(RpcError::connection_closed());
    }

    let rpc_msg = parse_websocket_message(ws_msg)?;

    match rpc_msg.message_type {
        MessageType::Notification => match rpc_msg.method.as_deref() {
            Some(methods::HEARTBEAT) => {
                debug!("收到 Agent 心跳: {}", connection.agent_id());
                connection.update_heartbeat().await;
            }
            Some(methods::AGENT_MESSAGE) => {
                let agent_message: AgentMessage = rpc_msg.payload_as()?;
                info!("📥 [Agent -> Server] 收到发言: agent={}", connection.agent_id());
                // 任何来自 Agent 的流量都说明它还活着
                connection.update_heartbeat().await;
                relay
                    .relay_agent_message(connection.name(), agent_message.message)
                    .await;
            }
            other => {
                return Err(RpcError::method_not_found(other.unwrap_or("<none>")));
            }
        },
        MessageType::Request => {
            let method = rpc_msg.method.clone().unwrap_or_default();
            warn!("Agent {} 发送了不支持的请求: {}", connection.agent_id(), method);
            connection.notify(RpcMessage::error_response(
                rpc_msg.id,
                &RpcError::method_not_found(method),
            ))?;
        }
        MessageType::Response => {
            debug!("忽略 Agent 响应: {}", rpc_msg.id);
        }
    }

    Ok(())
}

/// 解析 WebSocket 消息
fn parse_websocket_message(msg: AxumWsMessage) -> Result<RpcMessage, RpcError> {
    match msg {
        AxumWsMessage::Text(text) => Ok(RpcMessage::from_json(&text)?),
        AxumWsMessage::Binary(data) => {
            let text = String::from_utf8(data)
                .map_err(|e| RpcError::invalid_request(format!("二进制消息不是有效的 UTF-8: {}", e)))?;
            Ok(RpcMessage::from_json(&text)?)
        }
        _ => Err(RpcError::invalid_request("不支持的消息类型")),
    }
}

/// 发送消息
async fn send_message(
    sender: &mut futures_util::stream::SplitSink<WebSocket, AxumWsMessage>,
    msg: RpcMessage,
) -> Result<(), RpcError> {
    let json = msg.to_json()?;

    sender
        .send(AxumWsMessage::Text(json))
        .await
        .map_err(|e| RpcError::new(common::RpcErrorCode::ConnectionClosed, e.to_string()))?;

    Ok(())
}
