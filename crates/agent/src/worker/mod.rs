/// Worker 管理
///
/// 加载 Worker 名单，并以受监督的后台任务运行每个 Worker

use common::models::constants::DEFAULT_WORKER_ROLE;
use common::models::{AgentIdentity, AgentRecord};
use common::utils::worker_id;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ws::WorkerClient;

/// 默认 Worker 数量（API 不可用时使用）
const DEFAULT_WORKER_COUNT: usize = 3;

/// 加载名单的请求超时
const ROSTER_TIMEOUT: Duration = Duration::from_secs(10);

/// 默认 Worker 名单：worker_1 .. worker_3
pub fn default_roster() -> Vec<AgentIdentity> {
    (1..=DEFAULT_WORKER_COUNT)
        .map(|n| {
            let id = worker_id(n);
            AgentIdentity::new(id.clone(), id, DEFAULT_WORKER_ROLE)
        })
        .collect()
}

/// 从 Agent 管理 API 加载 Worker 名单
///
/// API 不可达或没有任何记录时返回默认名单。
pub async fn initialize_workers(http: &reqwest::Client, api_base: &str) -> Vec<AgentIdentity> {
    match fetch_agents(http, api_base).await {
        Ok(records) if !records.is_empty() => {
            info!("✅ 从 API 加载了 {} 个 Agent", records.len());
            records.into_iter().map(AgentIdentity::from).collect()
        }
        Ok(_) => {
            warn!("API 中没有 Agent 记录，使用默认名单");
            default_roster()
        }
        Err(e) => {
            warn!("加载 Agent 名单失败，使用默认名单: {}", e);
            default_roster()
        }
    }
}

async fn fetch_agents(http: &reqwest::Client, api_base: &str) -> Result<Vec<AgentRecord>, reqwest::Error> {
    let url = format!("{}/api/agents/", api_base.trim_end_matches('/'));
    http.get(&url)
        .timeout(ROSTER_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

/// 重启策略：固定间隔重连，可选的最大重启次数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub backoff: Duration,
    pub max_restarts: Option<u32>,
}

impl RestartPolicy {
    pub fn new(backoff: Duration, max_restarts: Option<u32>) -> Self {
        Self {
            backoff,
            max_restarts,
        }
    }

    /// 已重启 `restarts` 次后是否还允许再次重启
    pub fn allows_restart(&self, restarts: u32) -> bool {
        self.max_restarts.map_or(true, |max| restarts < max)
    }
}

/// Worker 退出原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// 收到取消信号
    Cancelled,
    /// 重启次数耗尽
    RestartsExhausted { restarts: u32 },
}

/// Worker 监督器
pub struct WorkerSupervisor {
    workers: JoinSet<(AgentIdentity, WorkerExit)>,
    policy: RestartPolicy,
    cancel: CancellationToken,
}

impl WorkerSupervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            workers: JoinSet::new(),
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// 用于取消所有 Worker 的令牌
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 启动一个 Worker
    pub fn spawn(&mut self, client: WorkerClient) {
        let policy = self.policy.clone();
        let cancel = self.cancel.child_token();
        info!("🤖 启动 Worker: {} ({})", client.identity().agent_id, client.identity().name);

        self.workers.spawn(async move {
            let exit = client.run(&policy, cancel).await;
            (client.identity().clone(), exit)
        });
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// 等待所有 Worker 退出，返回每个 Worker 的退出原因
    pub async fn wait(mut self) -> Vec<(AgentIdentity, WorkerExit)> {
        let mut exits = Vec::new();

        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok((identity, exit)) => {
                    match &exit {
                        WorkerExit::Cancelled => info!("Worker {} 已停止", identity.agent_id),
                        WorkerExit::RestartsExhausted { restarts } => error!(
                            "Worker {} 重启 {} 次后放弃",
                            identity.agent_id, restarts
                        ),
                    }
                    exits.push((identity, exit));
                }
                Err(e) => error!("Worker 任务异常退出: {}", e),
            }
        }

        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::WorkerHandler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 只应答一次的 HTTP 服务，返回给定的 JSON
    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            assert!(String::from_utf8_lossy(&request).starts_with("GET /api/agents/ "));

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    async fn unreachable_url(scheme: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("{}://{}", scheme, listener.local_addr().unwrap());
        drop(listener);
        url
    }

    #[test]
    fn test_default_roster() {
        let roster = default_roster();
        let ids: Vec<_> = roster.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["worker_1", "worker_2", "worker_3"]);
        assert!(roster.iter().all(|a| a.role == "worker" && a.name == a.agent_id));
    }

    #[test]
    fn test_restart_policy() {
        let unlimited = RestartPolicy::new(Duration::from_secs(5), None);
        assert!(unlimited.allows_restart(0));
        assert!(unlimited.allows_restart(u32::MAX));

        let bounded = RestartPolicy::new(Duration::from_secs(5), Some(2));
        assert!(bounded.allows_restart(0));
        assert!(bounded.allows_restart(1));
        assert!(!bounded.allows_restart(2));

        assert!(!RestartPolicy::new(Duration::ZERO, Some(0)).allows_restart(0));
    }

    #[tokio::test]
    async fn test_roster_from_api() {
        let base = serve_once(
            r#"[{"id":"worker_1","name":"Ada","unitId":"u1","jobRole":"analyst","instructions":"be brief"}]"#,
        )
        .await;

        let roster = initialize_workers(&reqwest::Client::new(), &format!("{}/", base)).await;
        assert_eq!(roster, vec![AgentIdentity::new("worker_1", "Ada", "analyst")]);
    }

    #[tokio::test]
    async fn test_empty_api_falls_back_to_default() {
        let base = serve_once("[]").await;
        let roster = initialize_workers(&reqwest::Client::new(), &base).await;
        assert_eq!(roster, default_roster());
    }

    #[tokio::test]
    async fn test_unreachable_api_falls_back_to_default() {
        let base = unreachable_url("http").await;
        let roster = initialize_workers(&reqwest::Client::new(), &base).await;
        assert_eq!(roster, default_roster());
    }

    #[tokio::test]
    async fn test_supervisor_reports_exhausted_workers() {
        let url = unreachable_url("ws").await;
        let mut supervisor = WorkerSupervisor::new(RestartPolicy::new(Duration::from_millis(5), Some(1)));

        for identity in default_roster().into_iter().take(2) {
            let handler = WorkerHandler::new(identity, Duration::ZERO);
            supervisor.spawn(WorkerClient::new(url.clone(), handler, Duration::from_secs(60)));
        }
        assert_eq!(supervisor.len(), 2);

        let exits = supervisor.wait().await;
        assert_eq!(exits.len(), 2);
        assert!(exits
            .iter()
            .all(|(_, exit)| *exit == WorkerExit::RestartsExhausted { restarts: 1 }));
    }

    #[tokio::test]
    async fn test_supervisor_cancels_all_workers() {
        let url = unreachable_url("ws").await;
        let mut supervisor = WorkerSupervisor::new(RestartPolicy::new(Duration::from_secs(3600), None));
        for identity in default_roster() {
            let handler = WorkerHandler::new(identity, Duration::ZERO);
            supervisor.spawn(WorkerClient::new(url.clone(), handler, Duration::from_secs(60)));
        }

        let cancel = supervisor.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let exits = supervisor.wait().await;
        assert_eq!(exits.len(), 3);
        assert!(exits.iter().all(|(_, exit)| *exit == WorkerExit::Cancelled));
    }
}
