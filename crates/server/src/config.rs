/// 配置管理

use common::models::constants;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_port: u16,
    pub agents_file: PathBuf,
    pub cors_origin: String,
    pub agent_settle_delay_ms: u64,
    pub agent_heartbeat_timeout_secs: u64,
    pub agent_heartbeat_check_secs: u64,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置（未设置的项使用默认值）
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .set_default("server_port", i64::from(constants::DEFAULT_SERVER_PORT))?
            .set_default("agents_file", "data/agents_data.json")?
            .set_default("cors_origin", "http://localhost:3000")?
            .set_default("agent_settle_delay_ms", constants::DEFAULT_SETTLE_DELAY_MS as i64)?
            .set_default("agent_heartbeat_timeout_secs", constants::DEFAULT_HEARTBEAT_TIMEOUT as i64)?
            .set_default("agent_heartbeat_check_secs", constants::DEFAULT_HEARTBEAT_INTERVAL as i64)?
            .set_default("log_level", "debug")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()
    }

    /// 校验取值范围
    fn validate(self) -> anyhow::Result<Self> {
        anyhow::ensure!(
            self.agent_heartbeat_check_secs > 0,
            "AGENT_HEARTBEAT_CHECK_SECS 必须大于 0"
        );
        anyhow::ensure!(
            self.agent_heartbeat_timeout_secs > 0,
            "AGENT_HEARTBEAT_TIMEOUT_SECS 必须大于 0"
        );
        Ok(self)
    }

    /// Agent 上线公告延迟
    pub fn agent_settle_delay(&self) -> Duration {
        Duration::from_millis(self.agent_settle_delay_ms)
    }
}

#[cfg(test)]
impl Config {
    /// 测试用配置
    pub fn for_tests(agents_file: impl Into<PathBuf>) -> Self {
        Self {
            server_port: 0,
            agents_file: agents_file.into(),
            cors_origin: "http://localhost:3000".to_string(),
            agent_settle_delay_ms: 0,
            agent_heartbeat_timeout_secs: constants::DEFAULT_HEARTBEAT_TIMEOUT,
            agent_heartbeat_check_secs: constants::DEFAULT_HEARTBEAT_INTERVAL,
            log_level: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::for_tests("agents.json").validate().is_ok());
    }

    #[test]
    fn test_zero_heartbeat_check_is_rejected() {
        let mut cfg = Config::for_tests("agents.json");
        cfg.agent_heartbeat_check_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("AGENT_HEARTBEAT_CHECK_SECS"));
    }

    #[test]
    fn test_zero_heartbeat_timeout_is_rejected() {
        let mut cfg = Config::for_tests("agents.json");
        cfg.agent_heartbeat_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
