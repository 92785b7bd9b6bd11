//! Router configuration for the submission API.

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;

use super::{handlers, require_api_key, AppState};

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/crawl", post(handlers::submit_crawl))
        .route("/crawl/batch", post(handlers::submit_batch))
        .route("/crawl/status/:job_id", get(handlers::job_status))
        .route("/crawl/results/:job_id", get(handlers::job_results))
        .route("/configurations", get(handlers::list_configurations))
        .route("/healthz", get(handlers::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
