//! # mk-api
//!
//! REST API for the metal-kit conductor.
//!
//! Every route is a thin wrapper around a [`mk_core::Conductor`] method.
//! Errors are returned as JSON [`mk_protocol::ErrorResponse`] bodies.
//!
//! ## Modules
//!
//! - [`error`]: Mapping of conductor errors to HTTP responses
//! - [`handlers`]: Route handlers
//! - [`routes`]: Router construction and shared state

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{router, AppState};

use mk_core::Conductor;
use tokio::net::TcpListener;

/// Serve the API on `bind` until the process is stopped.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(conductor: Conductor, bind: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %listener.local_addr()?, "API listening");
    axum::serve(listener, router(AppState::new(conductor))).await?;
    Ok(())
}
