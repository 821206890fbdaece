//! Alert history endpoint

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::api::{state::ApiState, types::AlertsResponse};

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Max results, newest kept (default: 100)
    limit: Option<usize>,
}

/// GET /api/v1/alerts
///
/// Most recent alerts, oldest first
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertQuery>,
) -> Json<AlertsResponse> {
    let limit = query.limit.unwrap_or(100).min(1000);

    let mut alerts = state.alert_log.recent().await;
    if alerts.len() > limit {
        alerts.drain(..alerts.len() - limit);
    }

    Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    })
}
