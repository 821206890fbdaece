//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::state::ApiState;
use crate::api::types::{HealthResponse, StorageHealth};

/// GET /api/v1/health
///
/// Reports storage health plus writer and evaluator statistics. A failing
/// store degrades the status but still answers 200.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let storage = match state.cache.store().health_check().await {
        Ok(health) => StorageHealth {
            healthy: health.healthy,
            message: Some(health.message),
        },
        Err(e) => StorageHealth {
            healthy: false,
            message: Some(e.to_string()),
        },
    };

    let writer = match &state.writer {
        Some(writer) => writer.get_stats().await,
        None => None,
    };
    let evaluator = match &state.evaluator {
        Some(evaluator) => evaluator.get_stats().await,
        None => None,
    };

    Json(HealthResponse {
        status: if storage.healthy { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage,
        reporters: state.cache.len().await,
        writer,
        evaluator,
    })
}
