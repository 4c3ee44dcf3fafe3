use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;

use crate::error::Result;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let store_status = match state.pipeline.rate_limiter().health_check().await {
        Ok(true) => "connected",
        Ok(false) => "error",
        Err(_) => "disconnected",
    };

    let overall_status = if store_status == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    Ok(Json(HealthResponse {
        status: overall_status.to_string(),
        rate_limit_store: store_status.to_string(),
        transport: state.pipeline.transport_name().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}
