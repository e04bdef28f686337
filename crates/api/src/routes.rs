//! Router construction.

use crate::handlers::{heartbeat, nodes, runbooks};
use axum::routing::{get, patch, post, put};
use axum::Router;
use mk_core::Conductor;
use tower_http::trace::TraceLayer;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub conductor: Conductor,
}

impl AppState {
    pub fn new(conductor: Conductor) -> Self {
        Self { conductor }
    }
}

/// Build the `/v1` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/nodes", get(nodes::list_nodes).post(nodes::create_node))
        .route(
            "/v1/nodes/:id",
            get(nodes::get_node).delete(nodes::delete_node),
        )
        .route("/v1/nodes/:id/states/provision", put(nodes::set_provision_state))
        .route("/v1/nodes/:id/maintenance", patch(nodes::set_maintenance))
        .route("/v1/heartbeat/:id", post(heartbeat::heartbeat))
        .route("/v1/runbooks", get(runbooks::list_runbooks))
        .route("/v1/runbooks/:name", get(runbooks::get_runbook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
