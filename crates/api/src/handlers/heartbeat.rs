//! Agent heartbeat handler.
//!
//! The ramdisk agent calls this without credentials, so it only accepts the
//! agent URL and the result of the step it was running.

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mk_protocol::HeartbeatRequest;

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    if request.agent_url.trim().is_empty() {
        return Err(ApiError::BadRequest("agent_url must not be empty".to_string()));
    }
    state.conductor.heartbeat(&id, request).await?;
    Ok(StatusCode::ACCEPTED)
}
