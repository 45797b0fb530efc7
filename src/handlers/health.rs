//! Liveness endpoint.

use axum::Json;
use chrono::Utc;

use crate::models::HealthResponse;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "filegate";

/// `GET /health` -- Report liveness with the build version.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
