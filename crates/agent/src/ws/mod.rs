/// WebSocket 客户端模块
///
/// Worker 通过 WebSocket 连接到 Server 的 Agent 桥接端点

pub mod client;
pub mod handler;

pub use client::WorkerClient;
pub use handler::WorkerHandler;
