//! `/v1/nodes` handlers.

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mk_protocol::{CreateNodeRequest, MaintenanceRequest, Node, ProvisionRequest};

pub async fn create_node(
    State(state): State<AppState>,
    Json(request): Json<CreateNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    if let Some(name) = &request.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("node name must not be empty".to_string()));
        }
        if state.conductor.get_node(name).await.is_ok() {
            return Err(ApiError::BadRequest(format!("node name {name} is already in use")));
        }
    }
    let node = state.conductor.enroll(request).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.conductor.list_nodes().await?))
}

/// `id` is a node UUID or name.
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Node>> {
    Ok(Json(state.conductor.get_node(&id).await?))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.conductor.delete_node(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a provisioning verb. The work continues after the response.
pub async fn set_provision_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ProvisionRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    tracing::info!(node = %id, verb = %request.target, "provision request");
    let node = state.conductor.provision(&id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(node)))
}

pub async fn set_maintenance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MaintenanceRequest>,
) -> ApiResult<Json<Node>> {
    Ok(Json(state.conductor.set_maintenance(&id, request).await?))
}
