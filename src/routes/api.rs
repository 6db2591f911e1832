//! REST route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api::health_check;
use crate::state::AppState;

/// Create the REST router.
///
/// # Endpoints
///
/// - `GET /` - health check (root-level for load balancers)
/// - `GET /health` - health check
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
}
