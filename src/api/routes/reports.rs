//! Single-shot report submission

use axum::{Json, extract::State};
use tracing::debug;

use crate::api::{error::ApiResult, state::ApiState};
use crate::{Report, ReportAck};

/// POST /api/v1/reports
///
/// Unknown reporters are acknowledged like everyone else.
pub async fn submit_report(
    State(state): State<ApiState>,
    Json(report): Json<Report>,
) -> ApiResult<Json<ReportAck>> {
    debug!(
        "report from '{}' with {} services",
        report.reporter_id,
        report.services.len()
    );

    let ack = state.ingestor.report_status(report).await?;
    Ok(Json(ack))
}
