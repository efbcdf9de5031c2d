pub mod agents;

use axum::Router;

use crate::app_state::AppState;

/// 所有 API 路由（统一入口）
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(agents::agent_routes())
}
