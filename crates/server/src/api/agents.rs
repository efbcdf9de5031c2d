/// Agent 管理接口

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json,
    Router,
};
use common::models::AgentRecord;
use serde::Serialize;
use tracing::error;
use validator::Validate;

use crate::{
    app_state::AppState,
    models::agent::{CreateAgentDto, UpdateAgentDto},
    services::AgentService,
};

/// Agent 路由（带或不带结尾斜杠都可访问列表和创建）
pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(create_agent))
        .route("/agents/", get(list_agents).post(create_agent))
        .route(
            "/agents/:id",
            get(get_agent).patch(update_agent).delete(delete_agent),
        )
}

/// 错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { detail: detail.into() }))
}

fn map_error(err: common::Error) -> ApiError {
    match err {
        common::Error::NotFound(detail) => api_error(StatusCode::NOT_FOUND, detail),
        common::Error::InvalidArgument(detail) => api_error(StatusCode::BAD_REQUEST, detail),
        other => {
            error!("Agent 数据操作失败: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// 验证输入，失败时返回 400
fn validate_dto(dto: &impl Validate) -> Result<(), ApiError> {
    dto.validate()
        .map_err(|e| map_error(common::Error::InvalidArgument(format!("验证失败: {}", e))))
}

/// 获取 Agent 列表
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentRecord>>, ApiError> {
    let service = AgentService::new(state);
    service.list_agents().await.map(Json).map_err(map_error)
}

/// 创建 Agent
pub async fn create_agent(
    State(state): State<AppState>,
    Json(dto): Json<CreateAgentDto>,
) -> Result<(StatusCode, Json<AgentRecord>), ApiError> {
    validate_dto(&dto)?;

    let service = AgentService::new(state);
    let agent = service.create_agent(dto).await.map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// 获取单个 Agent
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentRecord>, ApiError> {
    let service = AgentService::new(state);
    service.get_agent(&id).await.map(Json).map_err(map_error)
}

/// 部分更新 Agent
pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(dto): Json<UpdateAgentDto>,
) -> Result<Json<AgentRecord>, ApiError> {
    validate_dto(&dto)?;

    let service = AgentService::new(state);
    service.update_agent(&id, dto).await.map(Json).map_err(map_error)
}

/// 删除 Agent
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let service = AgentService::new(state);
    service.delete_agent(&id).await.map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}
