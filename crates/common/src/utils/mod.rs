/// 工具函数集合

use uuid::Uuid;

/// 生成唯一 ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 当前时间（秒，保留毫秒精度）
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// 按 `worker_<n>` 规则生成 Agent ID
pub fn worker_id(index: usize) -> String {
    format!("worker_{}", index)
}
