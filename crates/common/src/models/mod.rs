/// 共享数据模型
///
/// 定义 Server 和 Agent 共享的数据结构

use serde::{Deserialize, Serialize};

/// Agent 记录（由 Agent 管理 API 持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub unit_id: String,
    pub job_role: String,
    pub instructions: String,
    #[serde(default)]
    pub profile_icon: Option<String>,
}

/// Agent 身份
///
/// 在构造时确定，注册到桥接端点时整体发送
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub name: String,
    pub role: String,
}

impl AgentIdentity {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            role: role.into(),
        }
    }
}

impl From<AgentRecord> for AgentIdentity {
    fn from(record: AgentRecord) -> Self {
        Self {
            agent_id: record.id,
            name: record.name,
            role: record.job_role,
        }
    }
}

/// 常量定义
pub mod constants {
    /// 默认 Server 端口
    pub const DEFAULT_SERVER_PORT: u16 = 8000;

    /// 默认 Agent 心跳间隔（秒）
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;

    /// 默认 Agent 心跳超时（秒）
    pub const DEFAULT_HEARTBEAT_TIMEOUT: u64 = 180;

    /// 默认 Agent 上线公告延迟（毫秒）
    pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

    /// 默认 Worker 角色
    pub const DEFAULT_WORKER_ROLE: &str = "worker";
}
