/// 在线状态通知
///
/// 由连接注册表的状态变更推导出需要广播的事件，本身不持有状态。
/// 返回的事件列表顺序即广播顺序。

use common::ServerEvent;

/// 在线状态事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined { username: String },
    Left { username: String },
    TypingStarted { username: String },
    TypingStopped { username: String },
    CountChanged { count: usize },
}

impl From<PresenceEvent> for ServerEvent {
    fn from(event: PresenceEvent) -> Self {
        match event {
            PresenceEvent::Joined { username } => ServerEvent::UserJoined { username },
            PresenceEvent::Left { username } => ServerEvent::UserLeft { username },
            PresenceEvent::TypingStarted { username } => ServerEvent::UserTyping { username },
            // 客户端协议中 user_stopped_typing 不带用户名
            PresenceEvent::TypingStopped { .. } => ServerEvent::UserStoppedTyping,
            PresenceEvent::CountChanged { count } => ServerEvent::UsersCount { count },
        }
    }
}

/// 新连接注册
pub fn registered(count: usize) -> Vec<PresenceEvent> {
    vec![PresenceEvent::CountChanged { count }]
}

/// 连接注销：停止输入 -> 离开 -> 人数更新
pub fn unregistered(name: Option<String>, was_typing: bool, count: usize) -> Vec<PresenceEvent> {
    let mut events = Vec::with_capacity(3);
    if let Some(username) = name {
        if was_typing {
            events.push(PresenceEvent::TypingStopped { username: username.clone() });
        }
        events.push(PresenceEvent::Left { username });
    }
    events.push(PresenceEvent::CountChanged { count });
    events
}

/// 绑定显示名
pub fn name_bound(username: impl Into<String>) -> Vec<PresenceEvent> {
    vec![PresenceEvent::Joined { username: username.into() }]
}

/// 解除显示名（Agent 下线）
pub fn name_released(username: impl Into<String>) -> Vec<PresenceEvent> {
    vec![PresenceEvent::Left { username: username.into() }]
}

/// 输入状态切换
pub fn typing_changed(username: impl Into<String>, is_typing: bool) -> Vec<PresenceEvent> {
    let username = username.into();
    if is_typing {
        vec![PresenceEvent::TypingStarted { username }]
    } else {
        vec![PresenceEvent::TypingStopped { username }]
    }
}
