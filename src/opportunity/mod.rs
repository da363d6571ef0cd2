use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::funnel::FunnelStage;
use crate::pipeline::pg::PgStore;
use crate::pipeline::transition::{transition, TransitionTarget};
use crate::shared::schema::{contacts, funnel_stages, funnels, opportunities, opportunity_history};
use crate::shared::state::AppState;

pub mod actions {
    pub const CREATED: &str = "created";
    pub const STAGE_CHANGE: &str = "stage_change";
    pub const FUNNEL_ADVANCE: &str = "funnel_advance";
    pub const WON: &str = "won";
    pub const LOST: &str = "lost";
    pub const OWNER_TRANSFER: &str = "owner_transfer";
}

pub mod status {
    pub const ACTIVE: &str = "active";
    pub const WON: &str = "won";
    pub const LOST: &str = "lost";
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = opportunities)]
pub struct Opportunity {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub funnel_id: Uuid,
    pub stage_id: Option<Uuid>,
    pub status: String,
    pub stage_entered_at: DateTime<Utc>,
    pub proposal_value: Option<f64>,
    pub converted_at: Option<DateTime<Utc>>,
    pub lost_reason_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn is_active(&self) -> bool {
        self.status == status::ACTIVE
    }
}

/// Append-only ledger row. Entries are only ever inserted, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = opportunity_history)]
pub struct OpportunityHistoryEntry {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub action: String,
    pub from_stage_id: Option<Uuid>,
    pub to_stage_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OpportunityHistoryEntry {
    pub fn new(
        opportunity_id: Uuid,
        action: &str,
        from_stage_id: Option<Uuid>,
        to_stage_id: Option<Uuid>,
        actor_id: Option<Uuid>,
        note: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            action: action.to_string(),
            from_stage_id,
            to_stage_id,
            actor_id,
            note,
            created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOpportunityRequest {
    pub contact_id: Uuid,
    pub funnel_id: Uuid,
    pub stage_id: Option<Uuid>,
    pub proposal_value: Option<f64>,
    pub owner_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub funnel_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub status: Option<String>,
    pub owner_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StageMoveRequest {
    pub stage_id: Uuid,
    pub proposal_value: Option<f64>,
    pub actor_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkWonRequest {
    pub actor_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkLostRequest {
    pub lost_reason_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceFunnelRequest {
    pub actor_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnerRequest {
    pub new_owner_id: Uuid,
    pub actor_id: Uuid,
    pub note: Option<String>,
}

pub async fn create_opportunity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOpportunityRequest>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let funnel_active: i64 = funnels::table
        .filter(funnels::id.eq(req.funnel_id))
        .filter(funnels::is_active.eq(true))
        .count()
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    if funnel_active == 0 {
        return Err((StatusCode::BAD_REQUEST, "Unknown or inactive funnel".to_string()));
    }

    let contact_exists: i64 = contacts::table
        .filter(contacts::id.eq(req.contact_id))
        .count()
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    if contact_exists == 0 {
        return Err((StatusCode::BAD_REQUEST, "Unknown contact".to_string()));
    }

    let stage: FunnelStage = match req.stage_id {
        Some(stage_id) => funnel_stages::table
            .filter(funnel_stages::id.eq(stage_id))
            .filter(funnel_stages::funnel_id.eq(req.funnel_id))
            .first(&mut conn)
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "Stage does not belong to the funnel".to_string(),
                )
            })?,
        None => funnel_stages::table
            .filter(funnel_stages::funnel_id.eq(req.funnel_id))
            .order(funnel_stages::position.asc())
            .first(&mut conn)
            .map_err(|_| (StatusCode::BAD_REQUEST, "Funnel has no stages".to_string()))?,
    };

    if stage.requires_proposal_value && req.proposal_value.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "A proposal value is required to enter this stage".to_string(),
        ));
    }

    let now = Utc::now();
    let opportunity = Opportunity {
        id: Uuid::new_v4(),
        contact_id: req.contact_id,
        funnel_id: req.funnel_id,
        stage_id: Some(stage.id),
        status: status::ACTIVE.to_string(),
        stage_entered_at: now,
        proposal_value: req.proposal_value,
        converted_at: None,
        lost_reason_id: None,
        owner_id: req.owner_id,
        created_at: now,
        updated_at: now,
    };
    let entry = OpportunityHistoryEntry::new(
        opportunity.id,
        actions::CREATED,
        None,
        Some(stage.id),
        Some(req.owner_id),
        req.note,
        now,
    );

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(opportunities::table)
            .values(&opportunity)
            .execute(conn)?;
        diesel::insert_into(opportunity_history::table)
            .values(&entry)
            .execute(conn)?;
        Ok(())
    })
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(opportunity))
}

pub async fn list_opportunities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Opportunity>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = opportunities::table.into_boxed();

    if let Some(funnel_id) = query.funnel_id {
        q = q.filter(opportunities::funnel_id.eq(funnel_id));
    }
    if let Some(stage_id) = query.stage_id {
        q = q.filter(opportunities::stage_id.eq(stage_id));
    }
    if let Some(status) = query.status {
        q = q.filter(opportunities::status.eq(status));
    }
    if let Some(owner_id) = query.owner_id {
        q = q.filter(opportunities::owner_id.eq(owner_id));
    }

    let items: Vec<Opportunity> = q
        .order(opportunities::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(items))
}

pub async fn get_opportunity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let opportunity: Opportunity = opportunities::table
        .filter(opportunities::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Opportunity not found".to_string()))?;

    Ok(Json(opportunity))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OpportunityHistoryEntry>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let entries: Vec<OpportunityHistoryEntry> = opportunity_history::table
        .filter(opportunity_history::opportunity_id.eq(id))
        .order(opportunity_history::created_at.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(entries))
}

pub async fn move_stage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<StageMoveRequest>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let mut store = PgStore::new(&mut conn);

    let target = TransitionTarget::Stage {
        stage_id: req.stage_id,
        proposal_value: req.proposal_value,
    };
    let opportunity = transition(&mut store, id, target, req.actor_id, req.note, Utc::now())
        .map_err(|e| (e.status(), e.to_string()))?;

    Ok(Json(opportunity))
}

pub async fn mark_won(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkWonRequest>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let mut store = PgStore::new(&mut conn);

    let opportunity = transition(
        &mut store,
        id,
        TransitionTarget::Won,
        req.actor_id,
        req.note,
        Utc::now(),
    )
    .map_err(|e| (e.status(), e.to_string()))?;

    Ok(Json(opportunity))
}

pub async fn mark_lost(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkLostRequest>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let mut store = PgStore::new(&mut conn);

    let target = TransitionTarget::Lost {
        lost_reason_id: req.lost_reason_id,
    };
    let opportunity = transition(&mut store, id, target, req.actor_id, req.note, Utc::now())
        .map_err(|e| (e.status(), e.to_string()))?;

    Ok(Json(opportunity))
}

pub async fn advance_funnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdvanceFunnelRequest>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let mut store = PgStore::new(&mut conn);

    let opportunity = transition(
        &mut store,
        id,
        TransitionTarget::NextFunnel,
        req.actor_id,
        req.note,
        Utc::now(),
    )
    .map_err(|e| (e.status(), e.to_string()))?;

    Ok(Json(opportunity))
}

pub async fn transfer_owner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransferOwnerRequest>,
) -> Result<Json<Opportunity>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let opportunity: Opportunity = opportunities::table
        .filter(opportunities::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Opportunity not found".to_string()))?;

    let now = Utc::now();
    let entry = OpportunityHistoryEntry::new(
        id,
        actions::OWNER_TRANSFER,
        opportunity.stage_id,
        opportunity.stage_id,
        Some(req.actor_id),
        req.note,
        now,
    );

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::update(opportunities::table.filter(opportunities::id.eq(id)))
            .set((
                opportunities::owner_id.eq(req.new_owner_id),
                opportunities::updated_at.eq(now),
            ))
            .execute(conn)?;
        diesel::insert_into(opportunity_history::table)
            .values(&entry)
            .execute(conn)?;
        Ok(())
    })
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    let opportunity: Opportunity = opportunities::table
        .filter(opportunities::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Opportunity not found".to_string()))?;

    Ok(Json(opportunity))
}

pub fn configure_opportunity_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/opportunities", get(list_opportunities).post(create_opportunity))
        .route("/api/opportunities/:id", get(get_opportunity))
        .route("/api/opportunities/:id/history", get(get_history))
        .route("/api/opportunities/:id/stage", post(move_stage))
        .route("/api/opportunities/:id/won", post(mark_won))
        .route("/api/opportunities/:id/lost", post(mark_lost))
        .route("/api/opportunities/:id/advance", post(advance_funnel))
        .route("/api/opportunities/:id/transfer", post(transfer_owner))
}
