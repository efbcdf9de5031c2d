/// 消息中继
///
/// 处理聊天连接的所有事件：连接、断开、设置用户名、发消息、输入状态，
/// 以及来自 Agent 网络的消息和上下线。
///
/// 所有注册表变更和广播都在同一把写锁内完成，因此每个客户端看到的事件
/// 顺序一致。广播只覆盖调用时刻在线的连接；与广播同时建立或断开的连接
/// 是否收到该事件不做保证。向单个连接的投递是无界通道上的非阻塞发送，
/// 慢速客户端不会阻塞广播。

use common::{ChatMessage, ServerEvent};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::bridge::{AgentBridge, BridgeError};
use super::presence::PresenceEvent;
use super::registry::{ConnectionId, ConnectionRegistry};

#[derive(Clone)]
pub struct MessageRelay {
    registry: Arc<RwLock<ConnectionRegistry>>,
    bridge: Arc<dyn AgentBridge>,
}

impl MessageRelay {
    pub fn new(bridge: Arc<dyn AgentBridge>) -> Self {
        Self {
            registry: Arc::new(RwLock::new(ConnectionRegistry::new())),
            bridge,
        }
    }

    /// 注册新的聊天连接并广播在线人数
    pub async fn connect(
        &self,
        connection_id: impl Into<ConnectionId>,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let connection_id = connection_id.into();
        let mut registry = self.registry.write().await;
        let events = registry.register(connection_id.clone(), sender);
        info!("聊天连接已注册: {} (在线 {})", connection_id, registry.count());
        emit(&registry, events);
    }

    /// 注销聊天连接：广播离开（如已命名）以及更新后的在线人数
    pub async fn disconnect(&self, connection_id: &str) {
        let mut registry = self.registry.write().await;
        let events = registry.unregister(connection_id);
        if !events.is_empty() {
            info!("聊天连接已注销: {} (在线 {})", connection_id, registry.count());
        }
        emit(&registry, events);
    }

    /// 设置显示名并广播加入
    pub async fn set_username(&self, connection_id: &str, name: impl Into<String>) {
        let name = name.into();
        let mut registry = self.registry.write().await;
        let events = registry.bind_name(connection_id, name.clone());
        if !events.is_empty() {
            info!("{} 加入聊天 ({})", name, connection_id);
        }
        emit(&registry, events);
    }

    /// 中继一条用户消息
    ///
    /// 先向所有客户端广播（发送者自己也会收到），再异步转发给 Agent 网络。
    /// 转发不阻塞本调用，转发失败只记录日志。
    pub async fn relay(&self, connection_id: &str, body: impl Into<String>) -> ChatMessage {
        let message = {
            let registry = self.registry.write().await;
            let message = ChatMessage::stamped(registry.name_of(connection_id), body);
            info!("💬 来自 {} 的消息: {}", message.username, message.message);
            registry.broadcast(&ServerEvent::Response(message.clone()));
            message
        };

        self.forward(message.clone());
        message
    }

    /// 更新输入状态
    pub async fn relay_typing(&self, connection_id: &str, is_typing: bool) {
        let mut registry = self.registry.write().await;
        let events = registry.set_typing(connection_id, is_typing);
        emit(&registry, events);
    }

    /// 以 Agent 的名义广播一条消息
    ///
    /// 不再转发回 Agent 网络。
    pub async fn relay_agent_message(&self, sender_label: &str, body: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::stamped(sender_label, body);
        info!("🤖 来自 Agent {} 的消息: {}", message.username, message.message);

        let registry = self.registry.write().await;
        registry.broadcast(&ServerEvent::Response(message.clone()));
        message
    }

    /// Agent 上线：广播加入和上线公告
    ///
    /// `still_current` 在写锁内求值，结果为 false 时不做任何事并返回 false。
    /// 与 [`Self::agent_disconnected`] 串行，公告不会落在下线之后。
    pub async fn agent_connected<F>(&self, agent_id: &str, agent_name: &str, still_current: F) -> bool
    where
        F: Future<Output = bool>,
    {
        let mut registry = self.registry.write().await;
        if !still_current.await {
            debug!("Agent {} 会话已失效，跳过公告", agent_id);
            return false;
        }

        let events = registry.bind_agent(agent_id, agent_name);
        info!("🤖 Agent 已上线: {} ({})", agent_name, agent_id);
        emit(&registry, events);

        let notice = ChatMessage::stamped(agent_name, format!("Agent {} connected", agent_name));
        registry.broadcast(&ServerEvent::Response(notice));
        true
    }

    /// Agent 下线：广播离开
    pub async fn agent_disconnected(&self, agent_id: &str) {
        let mut registry = self.registry.write().await;
        let events = registry.unbind_agent(agent_id);
        if !events.is_empty() {
            info!("🤖 Agent 已下线: {}", agent_id);
        }
        emit(&registry, events);
    }

    /// 在线连接数量
    #[cfg(test)]
    pub async fn count(&self) -> usize {
        self.registry.read().await.count()
    }

    /// 查询显示名
    #[cfg(test)]
    pub async fn name_of(&self, connection_id: &str) -> String {
        self.registry.read().await.name_of(connection_id).to_string()
    }

    /// 后台转发给 Agent 网络
    fn forward(&self, message: ChatMessage) {
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            match bridge.forward_to_agents(&message).await {
                Ok(count) => debug!("消息已转发给 {} 个 Agent", count),
                Err(BridgeError::NoAgents) => debug!("没有在线的 Agent，消息未转发"),
                Err(e) => warn!("转发消息到 Agent 网络失败: {}", e),
            }
        });
    }
}

/// 按顺序广播在线状态事件
fn emit(registry: &ConnectionRegistry, events: Vec<PresenceEvent>) {
    for event in events {
        registry.broadcast(&ServerEvent::from(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::RpcError;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// 记录所有转发消息的桥接
    #[derive(Default)]
    struct RecordingBridge {
        forwarded: Mutex<Vec<ChatMessage>>,
        notify: Option<mpsc::UnboundedSender<ChatMessage>>,
    }

    #[async_trait]
    impl AgentBridge for RecordingBridge {
        async fn forward_to_agents(&self, message: &ChatMessage) -> Result<usize, BridgeError> {
            self.forwarded.lock().await.push(message.clone());
            if let Some(tx) = &self.notify {
                let _ = tx.send(message.clone());
            }
            Ok(1)
        }
    }

    /// 总是失败的桥接
    struct FailingBridge;

    #[async_trait]
    impl AgentBridge for FailingBridge {
        async fn forward_to_agents(&self, _message: &ChatMessage) -> Result<usize, BridgeError> {
            Err(BridgeError::Rpc(RpcError::connection_closed()))
        }
    }

    /// 永不返回的桥接
    struct HangingBridge;

    #[async_trait]
    impl AgentBridge for HangingBridge {
        async fn forward_to_agents(&self, _message: &ChatMessage) -> Result<usize, BridgeError> {
            std::future::pending::<()>().await;
            Ok(0)
        }
    }

    fn relay() -> MessageRelay {
        MessageRelay::new(Arc::new(RecordingBridge::default()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn response_of(event: &ServerEvent) -> &ChatMessage {
        match event {
            ServerEvent::Response(message) => message,
            other => panic!("期望 response 事件，实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_session_scenario() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();

        relay.connect("A", tx).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::UsersCount { count: 1 }]);

        relay.set_username("A", "Bob").await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::UserJoined { username: "Bob".into() }]);

        relay.relay("A", "hello").await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let message = response_of(&events[0]);
        assert_eq!(message.username, "Bob");
        assert_eq!(message.message, "hello");
        assert!(message.timestamp.is_some());

        relay.disconnect("A").await;
        assert_eq!(relay.count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_emits_left_before_count() {
        let relay = relay();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        relay.connect("A", tx_a).await;
        relay.connect("B", tx_b).await;
        relay.set_username("A", "Alice").await;
        drain(&mut rx_b);

        relay.disconnect("A").await;
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::UserLeft { username: "Alice".into() },
                ServerEvent::UsersCount { count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_users_count_tracks_live_set() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("observer", tx).await;

        let mut live = 1;
        let mut peers = Vec::new();
        for i in 0..5 {
            let (peer_tx, peer_rx) = mpsc::unbounded_channel();
            peers.push(peer_rx);
            relay.connect(format!("peer-{}", i), peer_tx).await;
            live += 1;
            assert_eq!(drain(&mut rx), vec![ServerEvent::UsersCount { count: live }]);
        }
        for i in (0..5).step_by(2) {
            relay.disconnect(&format!("peer-{}", i)).await;
            live -= 1;
            assert_eq!(drain(&mut rx), vec![ServerEvent::UsersCount { count: live }]);
        }
        // 重复断开不产生事件
        relay.disconnect("peer-0").await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(relay.count().await, live);
    }

    #[tokio::test]
    async fn test_unnamed_sender_is_unknown() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        drain(&mut rx);

        let message = relay.relay("A", "hi").await;
        assert_eq!(message.username, "Unknown");
        assert_eq!(response_of(&drain(&mut rx)[0]).username, "Unknown");
    }

    #[tokio::test]
    async fn test_rename_uses_latest_name() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        relay.set_username("A", "Bob").await;
        relay.set_username("A", "Robert").await;
        drain(&mut rx);

        assert_eq!(relay.name_of("A").await, "Robert");
        assert_eq!(relay.relay("A", "hey").await.username, "Robert");
    }

    #[tokio::test]
    async fn test_typing_events() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        relay.set_username("A", "Bob").await;
        drain(&mut rx);

        relay.relay_typing("A", true).await;
        relay.relay_typing("A", false).await;
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::UserTyping { username: "Bob".into() },
                ServerEvent::UserStoppedTyping,
            ]
        );
        assert_eq!(relay.count().await, 1);
    }

    #[tokio::test]
    async fn test_sender_receives_own_message_and_bridge_gets_copy() {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(RecordingBridge {
            forwarded: Mutex::new(Vec::new()),
            notify: Some(notify_tx),
        });
        let relay = MessageRelay::new(bridge.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        relay.connect("A", tx_a).await;
        relay.connect("B", tx_b).await;
        relay.set_username("A", "Bob").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let sent = relay.relay("A", "ping").await;
        assert_eq!(response_of(&drain(&mut rx_a)[0]), &sent);
        assert_eq!(response_of(&drain(&mut rx_b)[0]), &sent);

        let forwarded = tokio::time::timeout(Duration::from_secs(1), notify_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded, sent);
        assert_eq!(bridge.forwarded.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_bridge_does_not_block_broadcast() {
        let relay = MessageRelay::new(Arc::new(FailingBridge));
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        drain(&mut rx);

        relay.relay("A", "first").await;
        relay.relay("A", "second").await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(response_of(&events[1]).message, "second");
    }

    #[tokio::test]
    async fn test_hanging_bridge_does_not_block_relay() {
        let relay = MessageRelay::new(Arc::new(HangingBridge));
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        drain(&mut rx);

        tokio::time::timeout(Duration::from_secs(1), relay.relay("A", "hello"))
            .await
            .expect("relay 不应等待 Agent 处理");
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_agent_lifecycle_and_messages() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        drain(&mut rx);

        assert!(relay.agent_connected("worker_1", "Ada", async { true }).await);
        let events = drain(&mut rx);
        assert_eq!(events[0], ServerEvent::UserJoined { username: "Ada".into() });
        assert_eq!(response_of(&events[1]).message, "Agent Ada connected");
        assert_eq!(relay.count().await, 1);

        relay.relay_agent_message("Ada", "Message from Ada - hi").await;
        let events = drain(&mut rx);
        assert_eq!(response_of(&events[0]).username, "Ada");
        assert!(response_of(&events[0]).timestamp.is_some());

        relay.agent_disconnected("worker_1").await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::UserLeft { username: "Ada".into() }]);
    }

    #[tokio::test]
    async fn test_stale_agent_is_not_announced() {
        let relay = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.connect("A", tx).await;
        drain(&mut rx);

        assert!(!relay.agent_connected("worker_1", "Ada", async { false }).await);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(relay.name_of("worker_1").await, "Unknown");

        // 之后的下线不会产生孤立的离开事件
        relay.agent_disconnected("worker_1").await;
        assert!(drain(&mut rx).is_empty());
    }
}
