pub mod rest;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use rest::{
    analyze_handler, ask_handler, delete_session_handler, get_session_handler, health_handler,
    what_if_handler,
};
pub use state::AppState;

/// Builds the API router. CORS and the Swagger UI are layered on by the binary.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/what-if", post(what_if_handler))
        .route(
            "/api/session/{session_id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .layer(DefaultBodyLimit::max(rest::MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
