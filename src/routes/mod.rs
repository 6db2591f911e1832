pub mod api;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Assemble the full application router. Cross-cutting layers (CORS, rate
/// limiting, security headers) are applied by the binary on top of this.
pub fn app_router(state: Arc<AppState>) -> Router {
    api::create_api_router()
        .merge(ws::create_ws_router())
        .with_state(state)
}
