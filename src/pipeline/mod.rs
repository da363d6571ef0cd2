pub mod conversion;
pub mod pg;
pub mod sla;
pub mod store;
pub mod transition;

#[cfg(test)]
#[path = "pipeline.test.rs"]
mod tests;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::conversion::{BulkConversionReport, ConversionSettings};
use crate::pipeline::pg::PgStore;
use crate::pipeline::sla::SlaScanReport;
use crate::pipeline::store::StoreError;
use crate::shared::state::AppState;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("a proposal value is required to enter this stage")]
    MissingRequiredValue,
    #[error("a valid lost reason is required to mark an opportunity as lost")]
    MissingLostReason,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidTransition(_) => StatusCode::CONFLICT,
            PipelineError::MissingRequiredValue | PipelineError::MissingLostReason => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkMarkWonRequest {
    pub funnel_id: Uuid,
    pub stage_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SlaScanResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: SlaScanReport,
}

#[derive(Debug, Serialize)]
pub struct BulkMarkWonResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: BulkConversionReport,
}

/// Trigger surface for the scheduled SLA scan. The same scan also runs on
/// the configured cron schedule; this endpoint exists for manual and
/// external-scheduler invocation.
pub async fn run_sla_monitor(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SlaScanResponse>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let mut store = PgStore::new(&mut conn);

    let report = sla::run_sla_scan(&mut store, Utc::now())
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Scan error: {e}")))?;

    Ok(Json(SlaScanResponse {
        success: true,
        report,
    }))
}

pub async fn bulk_mark_won(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkMarkWonRequest>,
) -> Result<Json<BulkMarkWonResponse>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let mut store = PgStore::new(&mut conn);

    let settings = ConversionSettings {
        product_id: state.config.pipeline.default_product_id,
        pb_divisor: state.config.pipeline.pb_divisor,
    };

    let report = conversion::bulk_mark_won(&mut store, req.funnel_id, req.stage_id, &settings, Utc::now())
        .map_err(|e| match e {
            // An unknown funnel/stage is a bad request body on this surface.
            PipelineError::NotFound(_) | PipelineError::InvalidTransition(_) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    Ok(Json(BulkMarkWonResponse {
        success: true,
        report,
    }))
}

pub fn configure_pipeline_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pipeline/sla/run", post(run_sla_monitor))
        .route("/api/pipeline/bulk-won", post(bulk_mark_won))
}
