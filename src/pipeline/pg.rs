use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::funnel::{Funnel, FunnelStage};
use crate::notifications::Notification;
use crate::opportunity::{status, Opportunity, OpportunityHistoryEntry};
use crate::pipeline::conversion::Contract;
use crate::pipeline::store::{PipelineStore, StoreError};
use crate::shared::schema::{
    contacts, contracts, funnel_stages, funnels, lost_reasons, notifications, opportunities,
    opportunity_history,
};
use crate::shared::utils::utc_day_bounds;

pub struct PgStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PgStore<'a> {
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }
}

impl PipelineStore for PgStore<'_> {
    fn funnel(&mut self, id: Uuid) -> Result<Option<Funnel>, StoreError> {
        Ok(funnels::table
            .filter(funnels::id.eq(id))
            .first(self.conn)
            .optional()?)
    }

    fn stage(&mut self, id: Uuid) -> Result<Option<FunnelStage>, StoreError> {
        Ok(funnel_stages::table
            .filter(funnel_stages::id.eq(id))
            .first(self.conn)
            .optional()?)
    }

    fn first_stage_of_next_funnel(
        &mut self,
        after: &Funnel,
    ) -> Result<Option<(Funnel, FunnelStage)>, StoreError> {
        let next: Option<Funnel> = funnels::table
            .filter(funnels::is_active.eq(true))
            .filter(funnels::position.gt(after.position))
            .order(funnels::position.asc())
            .first(self.conn)
            .optional()?;
        let Some(next) = next else {
            return Ok(None);
        };
        let first: Option<FunnelStage> = funnel_stages::table
            .filter(funnel_stages::funnel_id.eq(next.id))
            .order(funnel_stages::position.asc())
            .first(self.conn)
            .optional()?;
        Ok(first.map(|stage| (next, stage)))
    }

    fn sla_stages(&mut self) -> Result<Vec<FunnelStage>, StoreError> {
        Ok(funnel_stages::table
            .filter(funnel_stages::sla_hours.gt(0))
            .load(self.conn)?)
    }

    fn opportunity(&mut self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        Ok(opportunities::table
            .filter(opportunities::id.eq(id))
            .first(self.conn)
            .optional()?)
    }

    fn active_in_stage(
        &mut self,
        funnel_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Vec<Opportunity>, StoreError> {
        Ok(opportunities::table
            .filter(opportunities::funnel_id.eq(funnel_id))
            .filter(opportunities::stage_id.eq(stage_id))
            .filter(opportunities::status.eq(status::ACTIVE))
            .order(opportunities::created_at.asc())
            .load(self.conn)?)
    }

    fn active_in_stages(&mut self, stage_ids: &[Uuid]) -> Result<Vec<Opportunity>, StoreError> {
        Ok(opportunities::table
            .filter(opportunities::stage_id.eq_any(stage_ids.to_vec()))
            .filter(opportunities::status.eq(status::ACTIVE))
            .load(self.conn)?)
    }

    fn lost_reason_active(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let count: i64 = lost_reasons::table
            .filter(lost_reasons::id.eq(id))
            .filter(lost_reasons::is_active.eq(true))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    fn contact_name(&mut self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(contacts::table
            .filter(contacts::id.eq(id))
            .select(contacts::full_name)
            .first(self.conn)
            .optional()?)
    }

    fn notified_today(
        &mut self,
        user_id: Uuid,
        kind: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let (day_start, day_end) = utc_day_bounds(now);
        let count: i64 = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::kind.eq(kind))
            .filter(notifications::link.eq(link))
            .filter(notifications::created_at.ge(day_start))
            .filter(notifications::created_at.lt(day_end))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    fn insert_notification(&mut self, notification: Notification) -> Result<(), StoreError> {
        diesel::insert_into(notifications::table)
            .values(&notification)
            .execute(self.conn)?;
        Ok(())
    }

    fn apply_transition(
        &mut self,
        opportunity: &Opportunity,
        entry: OpportunityHistoryEntry,
    ) -> Result<(), StoreError> {
        self.conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::update(opportunities::table.filter(opportunities::id.eq(opportunity.id)))
                .set((
                    opportunities::funnel_id.eq(opportunity.funnel_id),
                    opportunities::stage_id.eq(opportunity.stage_id),
                    opportunities::status.eq(&opportunity.status),
                    opportunities::stage_entered_at.eq(opportunity.stage_entered_at),
                    opportunities::proposal_value.eq(opportunity.proposal_value),
                    opportunities::converted_at.eq(opportunity.converted_at),
                    opportunities::lost_reason_id.eq(opportunity.lost_reason_id),
                    opportunities::updated_at.eq(opportunity.updated_at),
                ))
                .execute(conn)?;
            diesel::insert_into(opportunity_history::table)
                .values(&entry)
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    fn convert_won(
        &mut self,
        opportunity_id: Uuid,
        now: DateTime<Utc>,
        contract: Contract,
        entry: OpportunityHistoryEntry,
    ) -> Result<bool, StoreError> {
        let converted = self.conn.transaction::<_, diesel::result::Error, _>(|conn| {
            // The status filter is the concurrency guard: an opportunity a
            // human just moved or converted is left untouched.
            let updated = diesel::update(
                opportunities::table
                    .filter(opportunities::id.eq(opportunity_id))
                    .filter(opportunities::status.eq(status::ACTIVE)),
            )
            .set((
                opportunities::status.eq(status::WON),
                opportunities::converted_at.eq(Some(now)),
                opportunities::updated_at.eq(now),
            ))
            .execute(conn)?;
            if updated == 0 {
                return Ok(false);
            }
            diesel::insert_into(contracts::table)
                .values(&contract)
                .execute(conn)?;
            diesel::insert_into(opportunity_history::table)
                .values(&entry)
                .execute(conn)?;
            Ok(true)
        })?;
        Ok(converted)
    }
}
