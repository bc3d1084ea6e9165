use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session observation
        .route("/session", get(handlers::get_session))
        .route("/session/turns", get(handlers::get_turns))
        // Session control
        .route("/session/connect", post(handlers::connect))
        .route("/session/disconnect", post(handlers::disconnect))
        .route("/session/text", post(handlers::send_text))
        .route("/session/media", post(handlers::send_media))
        .route("/session/subject", post(handlers::set_subject))
        .route("/subjects", get(handlers::list_subjects))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
