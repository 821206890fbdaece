//! Reporter status endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ReporterInfo, ReporterState, ReportersResponse},
};

/// Query parameters for reporter listings
#[derive(Debug, Default, Deserialize)]
pub struct ReporterQuery {
    /// Bypass the cache TTL and re-read storage
    #[serde(default)]
    refresh: bool,

    /// Only return reporters in this state
    state: Option<ReporterState>,
}

/// GET /api/v1/reporters
///
/// List all reporters matching the configured patterns, sorted by ID
pub async fn list_reporters(
    State(state): State<ApiState>,
    Query(query): Query<ReporterQuery>,
) -> ApiResult<Json<ReportersResponse>> {
    let snapshot = state.cache.get(query.refresh).await?;

    let mut reporters: Vec<ReporterInfo> = snapshot
        .values()
        .map(ReporterInfo::from)
        .filter(|info| query.state.is_none_or(|wanted| info.state == wanted))
        .collect();
    reporters.sort_by(|a, b| a.id.cmp(&b.id));

    let offline = reporters
        .iter()
        .filter(|info| info.state == ReporterState::Offline)
        .count();

    Ok(Json(ReportersResponse {
        count: reporters.len(),
        offline,
        reporters,
    }))
}

/// GET /api/v1/reporters/:id
///
/// The cached entry if there is one, otherwise whatever storage holds
pub async fn get_reporter(
    State(state): State<ApiState>,
    Path(reporter_id): Path<String>,
) -> ApiResult<Json<ReporterInfo>> {
    if let Some(status) = state.cache.lookup(&reporter_id).await {
        return Ok(Json(ReporterInfo::from(&status)));
    }

    match state.cache.store().get(&reporter_id).await {
        Ok(status) => Ok(Json(ReporterInfo::from(&status))),
        Err(e) if e.is_not_found() => Err(ApiError::NotFound(format!(
            "unknown reporter '{}'",
            reporter_id
        ))),
        Err(e) => Err(e.into()),
    }
}
