use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::funnel::{Funnel, FunnelStage};
use crate::notifications::Notification;
use crate::opportunity::{Opportunity, OpportunityHistoryEntry};
use crate::pipeline::conversion::Contract;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),
    #[error("{0}")]
    Backend(String),
}

/// Data-access seam for the pipeline engine. Production uses the diesel
/// implementation in [`crate::pipeline::pg`]; engine tests run against an
/// in-memory store.
///
/// `apply_transition` and `convert_won` are each one atomic unit:
/// the entity write and the ledger append (plus the contract insert for
/// conversions) commit together or not at all.
pub trait PipelineStore {
    fn funnel(&mut self, id: Uuid) -> Result<Option<Funnel>, StoreError>;
    fn stage(&mut self, id: Uuid) -> Result<Option<FunnelStage>, StoreError>;

    /// First-position stage of the next active funnel after `after`,
    /// ordered by funnel position. `None` when there is no such funnel or
    /// it has no stages.
    fn first_stage_of_next_funnel(
        &mut self,
        after: &Funnel,
    ) -> Result<Option<(Funnel, FunnelStage)>, StoreError>;

    /// All stages with a positive SLA, across every funnel.
    fn sla_stages(&mut self) -> Result<Vec<FunnelStage>, StoreError>;

    fn opportunity(&mut self, id: Uuid) -> Result<Option<Opportunity>, StoreError>;
    fn active_in_stage(
        &mut self,
        funnel_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Vec<Opportunity>, StoreError>;
    fn active_in_stages(&mut self, stage_ids: &[Uuid]) -> Result<Vec<Opportunity>, StoreError>;

    fn lost_reason_active(&mut self, id: Uuid) -> Result<bool, StoreError>;
    fn contact_name(&mut self, id: Uuid) -> Result<Option<String>, StoreError>;

    /// Whether a notification with this (recipient, kind, link) triple was
    /// already created during the UTC calendar day containing `now`.
    fn notified_today(
        &mut self,
        user_id: Uuid,
        kind: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    fn insert_notification(&mut self, notification: Notification) -> Result<(), StoreError>;

    /// Persist an already-validated transition: entity update plus one
    /// ledger entry, atomically.
    fn apply_transition(
        &mut self,
        opportunity: &Opportunity,
        entry: OpportunityHistoryEntry,
    ) -> Result<(), StoreError>;

    /// Convert one opportunity to won: contract insert, status update and
    /// ledger append as a single unit. Re-checks `status = active` inside
    /// the transaction and returns `Ok(false)` without writing anything
    /// when the opportunity was moved or converted in the meantime.
    fn convert_won(
        &mut self,
        opportunity_id: Uuid,
        now: DateTime<Utc>,
        contract: Contract,
        entry: OpportunityHistoryEntry,
    ) -> Result<bool, StoreError>;
}
