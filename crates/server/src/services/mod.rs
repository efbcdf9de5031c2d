/// 业务服务层

pub mod agent_service;

pub use agent_service::AgentService;
