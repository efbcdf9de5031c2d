/// Agent 记录管理服务
///
/// 记录以 JSON 数组保存在单个文件中，每次请求整体读取、整体重写。
/// 不做并发写保护，并发写入时以最后一次为准。

use common::models::AgentRecord;
use common::{utils, Error, Result};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::models::agent::{CreateAgentDto, UpdateAgentDto};

pub struct AgentService {
    path: PathBuf,
}

impl AgentService {
    pub fn new(state: AppState) -> Self {
        Self::with_path(state.config.agents_file.clone())
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// 读取全部记录，文件不存在时返回空列表
    async fn load(&self) -> Result<Vec<AgentRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Agent 数据文件不存在: {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// 整体重写数据文件
    async fn save(&self, agents: &[AgentRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(agents)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// 获取 Agent 列表
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.load().await
    }

    /// 获取单个 Agent
    pub async fn get_agent(&self, id: &str) -> Result<AgentRecord> {
        self.load()
            .await?
            .into_iter()
            .find(|agent| agent.id == id)
            .ok_or_else(|| Error::NotFound("Agent not found".to_string()))
    }

    /// 创建 Agent，ID 为 `worker_<当前数量 + 1>`
    pub async fn create_agent(&self, dto: CreateAgentDto) -> Result<AgentRecord> {
        let mut agents = self.load().await?;

        let agent = dto.into_record(utils::worker_id(agents.len() + 1));
        agents.push(agent.clone());
        self.save(&agents).await?;

        info!("Agent 已创建: {} ({})", agent.id, agent.name);
        Ok(agent)
    }

    /// 部分更新 Agent
    pub async fn update_agent(&self, id: &str, dto: UpdateAgentDto) -> Result<AgentRecord> {
        let mut agents = self.load().await?;

        let agent = agents
            .iter_mut()
            .find(|agent| agent.id == id)
            .ok_or_else(|| Error::NotFound("Agent not found".to_string()))?;
        dto.apply(agent);
        let updated = agent.clone();

        self.save(&agents).await?;
        info!("Agent 已更新: {}", id);
        Ok(updated)
    }

    /// 删除 Agent
    pub async fn delete_agent(&self, id: &str) -> Result<()> {
        let agents = self.load().await?;
        let before = agents.len();

        let remaining: Vec<AgentRecord> = agents.into_iter().filter(|agent| agent.id != id).collect();
        if remaining.len() == before {
            return Err(Error::NotFound("Agent not found".to_string()));
        }

        self.save(&remaining).await?;
        info!("Agent 已删除: {}", id);
        Ok(())
    }
}
