//! `/v1/runbooks` handlers.

use crate::error::ApiResult;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::Json;
use mk_protocol::Runbook;

pub async fn list_runbooks(State(state): State<AppState>) -> ApiResult<Json<Vec<Runbook>>> {
    Ok(Json(state.conductor.list_runbooks().await?))
}

/// `name` is a runbook name or UUID.
pub async fn get_runbook(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Runbook>> {
    Ok(Json(state.conductor.get_runbook(&name).await?))
}
