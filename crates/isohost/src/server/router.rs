//! HTTP Router
//!
//! Sets up the axum router with the instance lifecycle routes.

use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handler::{add_new_instance, delete_instance, list_instances, run_instance};
use super::protocol::HealthResponse;
use super::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/add_new_instance", post(add_new_instance))
        .route("/run_instance", get(run_instance))
        .route("/delete_instance", delete(delete_instance))
        .route("/instances", get(list_instances))
        // Health check for monitoring/load balancers
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instances: state.instance_count(),
    })
}
