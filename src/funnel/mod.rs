use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::schema::{funnel_stages, funnels, lost_reasons, opportunities};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = funnels)]
pub struct Funnel {
    pub id: Uuid,
    pub name: String,
    pub position: i32,
    pub is_active: bool,
    pub generates_contract: bool,
    pub contract_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = funnel_stages)]
pub struct FunnelStage {
    pub id: Uuid,
    pub funnel_id: Uuid,
    pub name: String,
    pub position: i32,
    pub sla_hours: Option<i32>,
    pub requires_proposal_value: bool,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FunnelStage {
    /// A stage carries an SLA only when the configured value is positive;
    /// zero and absent both mean "no SLA".
    pub fn effective_sla_hours(&self) -> Option<i32> {
        self.sla_hours.filter(|h| *h > 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = lost_reasons)]
pub struct LostReason {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFunnelRequest {
    pub name: String,
    pub position: Option<i32>,
    pub generates_contract: Option<bool>,
    pub contract_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFunnelRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub generates_contract: Option<bool>,
    pub contract_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStageRequest {
    pub name: String,
    pub position: Option<i32>,
    pub sla_hours: Option<i32>,
    pub requires_proposal_value: Option<bool>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStageRequest {
    pub name: Option<String>,
    pub sla_hours: Option<i32>,
    pub requires_proposal_value: Option<bool>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLostReasonRequest {
    pub name: String,
}

pub async fn list_funnels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Funnel>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let items: Vec<Funnel> = funnels::table
        .filter(funnels::is_active.eq(true))
        .order(funnels::position.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(items))
}

pub async fn create_funnel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFunnelRequest>,
) -> Result<Json<Funnel>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let position = match req.position {
        Some(pos) => {
            let taken: i64 = funnels::table
                .filter(funnels::is_active.eq(true))
                .filter(funnels::position.eq(pos))
                .count()
                .get_result(&mut conn)
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
            if taken > 0 {
                return Err((
                    StatusCode::CONFLICT,
                    format!("Funnel position {pos} is already in use"),
                ));
            }
            pos
        }
        None => {
            let max: Option<i32> = funnels::table
                .select(diesel::dsl::max(funnels::position))
                .first(&mut conn)
                .unwrap_or(None);
            max.unwrap_or(0) + 1
        }
    };

    let funnel = Funnel {
        id: Uuid::new_v4(),
        name: req.name,
        position,
        is_active: true,
        generates_contract: req.generates_contract.unwrap_or(false),
        contract_prompt: req.contract_prompt,
        created_at: Utc::now(),
    };

    diesel::insert_into(funnels::table)
        .values(&funnel)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(funnel))
}

pub async fn update_funnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateFunnelRequest>,
) -> Result<Json<Funnel>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    if let Some(name) = req.name {
        diesel::update(funnels::table.filter(funnels::id.eq(id)))
            .set(funnels::name.eq(name))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    if let Some(is_active) = req.is_active {
        diesel::update(funnels::table.filter(funnels::id.eq(id)))
            .set(funnels::is_active.eq(is_active))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    if let Some(generates_contract) = req.generates_contract {
        diesel::update(funnels::table.filter(funnels::id.eq(id)))
            .set(funnels::generates_contract.eq(generates_contract))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    if let Some(contract_prompt) = req.contract_prompt {
        diesel::update(funnels::table.filter(funnels::id.eq(id)))
            .set(funnels::contract_prompt.eq(contract_prompt))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    let funnel: Funnel = funnels::table
        .filter(funnels::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Funnel not found".to_string()))?;

    Ok(Json(funnel))
}

pub async fn list_stages(
    State(state): State<Arc<AppState>>,
    Path(funnel_id): Path<Uuid>,
) -> Result<Json<Vec<FunnelStage>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let stages: Vec<FunnelStage> = funnel_stages::table
        .filter(funnel_stages::funnel_id.eq(funnel_id))
        .order(funnel_stages::position.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(stages))
}

pub async fn create_stage(
    State(state): State<Arc<AppState>>,
    Path(funnel_id): Path<Uuid>,
    Json(req): Json<CreateStageRequest>,
) -> Result<Json<FunnelStage>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let funnel_exists: i64 = funnels::table
        .filter(funnels::id.eq(funnel_id))
        .count()
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    if funnel_exists == 0 {
        return Err((StatusCode::NOT_FOUND, "Funnel not found".to_string()));
    }

    let position = match req.position {
        Some(pos) => {
            let taken: i64 = funnel_stages::table
                .filter(funnel_stages::funnel_id.eq(funnel_id))
                .filter(funnel_stages::position.eq(pos))
                .count()
                .get_result(&mut conn)
                .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
            if taken > 0 {
                return Err((
                    StatusCode::CONFLICT,
                    format!("Stage position {pos} is already in use in this funnel"),
                ));
            }
            pos
        }
        None => {
            let max: Option<i32> = funnel_stages::table
                .filter(funnel_stages::funnel_id.eq(funnel_id))
                .select(diesel::dsl::max(funnel_stages::position))
                .first(&mut conn)
                .unwrap_or(None);
            max.unwrap_or(0) + 1
        }
    };

    let stage = FunnelStage {
        id: Uuid::new_v4(),
        funnel_id,
        name: req.name,
        position,
        sla_hours: req.sla_hours,
        requires_proposal_value: req.requires_proposal_value.unwrap_or(false),
        color: req.color,
        created_at: Utc::now(),
    };

    diesel::insert_into(funnel_stages::table)
        .values(&stage)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(stage))
}

pub async fn update_stage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStageRequest>,
) -> Result<Json<FunnelStage>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    if let Some(name) = req.name {
        diesel::update(funnel_stages::table.filter(funnel_stages::id.eq(id)))
            .set(funnel_stages::name.eq(name))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    if let Some(sla_hours) = req.sla_hours {
        diesel::update(funnel_stages::table.filter(funnel_stages::id.eq(id)))
            .set(funnel_stages::sla_hours.eq(Some(sla_hours)))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    if let Some(requires) = req.requires_proposal_value {
        diesel::update(funnel_stages::table.filter(funnel_stages::id.eq(id)))
            .set(funnel_stages::requires_proposal_value.eq(requires))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    if let Some(color) = req.color {
        diesel::update(funnel_stages::table.filter(funnel_stages::id.eq(id)))
            .set(funnel_stages::color.eq(Some(color)))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    let stage: FunnelStage = funnel_stages::table
        .filter(funnel_stages::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Stage not found".to_string()))?;

    Ok(Json(stage))
}

/// Stages stay deletable only while no opportunity references them.
pub async fn delete_stage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let referenced: i64 = opportunities::table
        .filter(opportunities::stage_id.eq(id))
        .count()
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    if referenced > 0 {
        return Err((
            StatusCode::CONFLICT,
            format!("Stage is referenced by {referenced} opportunities"),
        ));
    }

    diesel::delete(funnel_stages::table.filter(funnel_stages::id.eq(id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_lost_reasons(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LostReason>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let reasons: Vec<LostReason> = lost_reasons::table
        .filter(lost_reasons::is_active.eq(true))
        .order(lost_reasons::name.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(reasons))
}

pub async fn create_lost_reason(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLostReasonRequest>,
) -> Result<Json<LostReason>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let reason = LostReason {
        id: Uuid::new_v4(),
        name: req.name,
        is_active: true,
        created_at: Utc::now(),
    };

    diesel::insert_into(lost_reasons::table)
        .values(&reason)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(reason))
}

pub fn configure_funnel_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/funnels", get(list_funnels).post(create_funnel))
        .route("/api/funnels/:id", put(update_funnel))
        .route("/api/funnels/:id/stages", get(list_stages).post(create_stage))
        .route("/api/stages/:id", put(update_stage).delete(delete_stage))
        .route("/api/lost-reasons", get(list_lost_reasons).post(create_lost_reason))
}
