/// WebSocket 客户端
///
/// Worker 连接到 Server Agent 桥接端点的 WebSocket 客户端

use common::models::AgentIdentity;
use common::ws_rpc::{methods, Heartbeat, RpcMessage};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::WorkerHandler;
use crate::worker::{RestartPolicy, WorkerExit};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 等待注册响应的超时时间
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// 客户端错误
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket 错误: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("注册失败: {0}")]
    Registration(String),

    #[error("等待注册响应超时")]
    RegisterTimeout,

    #[error("连接已关闭")]
    Closed,
}

/// WebSocket 客户端状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Registered,
}

/// Worker WebSocket 客户端
#[derive(Clone)]
pub struct WorkerClient {
    /// Server 地址
    server_url: String,

    /// 消息处理器（持有 Worker 身份）
    handler: Arc<WorkerHandler>,

    /// 客户端状态
    state: Arc<RwLock<ClientState>>,

    /// 心跳间隔
    heartbeat_interval: Duration,
}

impl WorkerClient {
    /// 创建新的 WebSocket 客户端
    pub fn new(
        server_url: impl Into<String>,
        handler: WorkerHandler,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            handler: Arc::new(handler),
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            heartbeat_interval,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        self.handler.identity()
    }

    /// 启动客户端（连接并保持），按重启策略断线重连
    pub async fn run(&self, policy: &RestartPolicy, cancel: CancellationToken) -> WorkerExit {
        let agent_id = self.identity().agent_id.clone();
        let mut restarts = 0u32;

        loop {
            info!("[{}] 尝试连接到 Server: {}", agent_id, self.server_url);

            match self.connect_and_run(&cancel).await {
                Ok(()) => info!("[{}] 连接正常关闭", agent_id),
                Err(e) => error!("[{}] 连接错误: {}", agent_id, e),
            }

            self.set_state(ClientState::Disconnected).await;

            if cancel.is_cancelled() {
                return WorkerExit::Cancelled;
            }
            if !policy.allows_restart(restarts) {
                warn!("[{}] 已达到最大重启次数 {}", agent_id, restarts);
                return WorkerExit::RestartsExhausted { restarts };
            }
            restarts += 1;

            warn!("[{}] {}秒后重新连接...", agent_id, policy.backoff.as_secs_f32());
            tokio::select! {
                _ = tokio::time::sleep(policy.backoff) => {}
                _ = cancel.cancelled() => return WorkerExit::Cancelled,
            }
        }
    }

    /// 连接并运行，直到连接断开或收到取消信号
    pub async fn connect_and_run(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let agent_id = self.identity().agent_id.clone();
        self.set_state(ClientState::Connecting).await;

        // 连接到 Server
        let (ws_stream, _) = tokio::select! {
            result = connect_async(self.server_url.as_str()) => result?,
            _ = cancel.cancelled() => return Ok(()),
        };
        info!("✅ [{}] WebSocket 连接成功", agent_id);
        self.set_state(ClientState::Connected).await;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // 发送注册请求
        let register_msg = RpcMessage::request(
            methods::REGISTER,
            serde_json::to_value(self.identity())?,
        );
        let register_id = register_msg.id.clone();
        ws_sender.send(Message::Text(register_msg.to_json()?)).await?;
        debug!("[{}] 已发送注册请求", agent_id);

        // 等待注册响应
        tokio::select! {
            result = tokio::time::timeout(
                REGISTER_TIMEOUT,
                wait_for_register_response(&mut ws_receiver, &register_id),
            ) => result.map_err(|_| ClientError::RegisterTimeout)??,
            _ = cancel.cancelled() => return Ok(()),
        }
        info!("✅ [{}] 注册成功", agent_id);
        self.set_state(ClientState::Registered).await;

        // 创建消息发送通道
        let (tx, mut rx) = mpsc::unbounded_channel::<RpcMessage>();

        // 启动心跳任务
        let tx_heartbeat = tx.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            // 第一次 tick 立即返回，注册本身已刷新心跳
            interval.tick().await;
            loop {
                interval.tick().await;

                let heartbeat = Heartbeat {
                    timestamp: chrono::Utc::now().timestamp(),
                };
                let heartbeat_msg = match RpcMessage::notify_with(methods::HEARTBEAT, &heartbeat) {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!("构造心跳失败: {}", e);
                        continue;
                    }
                };

                if tx_heartbeat.send(heartbeat_msg).is_err() {
                    break;
                }
                debug!("发送心跳");
            }
        });

        // 启动发送任务
        let mut send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match msg.to_json() {
                    Ok(j) => j,
                    Err(e) => {
                        error!("序列化消息失败: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    error!("发送消息失败: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("发送任务结束");
        });

        // 启动接收任务
        let handler = self.handler.clone();
        let tx_recv = tx.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                let msg = match result {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!("接收消息错误: {}", e);
                        break;
                    }
                };

                let rpc_msg = match parse_message(msg) {
                    Ok(Some(rpc_msg)) => rpc_msg,
                    Ok(None) => continue,
                    Err(ClientError::Closed) => {
                        warn!("收到连接关闭消息");
                        break;
                    }
                    Err(e) => {
                        error!("解析消息失败: {}", e);
                        continue;
                    }
                };

                // 每条消息独立处理，回复延迟不阻塞后续消息
                let handler = handler.clone();
                let tx = tx_recv.clone();
                tokio::spawn(async move {
                    handler.handle_message(rpc_msg, &tx).await;
                });
            }
            debug!("接收任务结束");
        });
        drop(tx);

        // 等待任一任务完成
        tokio::select! {
            _ = &mut send_task => debug!("[{}] 发送任务已结束", agent_id),
            _ = &mut recv_task => debug!("[{}] 接收任务已结束", agent_id),
            _ = cancel.cancelled() => info!("[{}] 收到取消信号，断开连接", agent_id),
        }

        heartbeat_task.abort();
        recv_task.abort();
        send_task.abort();

        Ok(())
    }

    /// 获取当前状态
    #[cfg(test)]
    pub async fn state(&self) -> ClientState {
        self.state.read().await.clone()
    }

    async fn set_state(&self, new_state: ClientState) {
        let mut state = self.state.write().await;
        *state = new_state;
    }
}

/// 等待与注册请求对应的响应，期间的其他消息被忽略
async fn wait_for_register_response(
    ws_receiver: &mut SplitStream<WsStream>,
    register_id: &str,
) -> Result<(), ClientError> {
    while let Some(msg) = ws_receiver.next().await {
        let Some(rpc_msg) = parse_message(msg?)? else {
            continue;
        };
        if rpc_msg.id != register_id {
            debug!("注册完成前收到其他消息，忽略: {:?}", rpc_msg.method);
            continue;
        }
        if rpc_msg.is_success() {
            return Ok(());
        }
        let reason = rpc_msg
            .error
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or_else(|| "未知错误".to_string());
        return Err(ClientError::Registration(reason));
    }
    Err(ClientError::Closed)
}

/// 解析消息，控制帧返回 `None`
fn parse_message(msg: Message) -> Result<Option<RpcMessage>, ClientError> {
    match msg {
        Message::Text(text) => Ok(Some(RpcMessage::from_json(&text)?)),
        Message::Binary(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Message::Close(_) => Err(ClientError::Closed),
        _ => Ok(None),
    }
}
