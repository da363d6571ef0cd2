use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::opportunity::{actions, status, Opportunity, OpportunityHistoryEntry};
use crate::pipeline::store::PipelineStore;
use crate::pipeline::PipelineError;

#[derive(Debug, Clone)]
pub enum TransitionTarget {
    /// Move within the current funnel. A proposal value supplied here is
    /// committed atomically with the stage write.
    Stage {
        stage_id: Uuid,
        proposal_value: Option<f64>,
    },
    Won,
    Lost { lost_reason_id: Option<Uuid> },
    /// Graduate to the next active funnel, seeding its first-position stage.
    NextFunnel,
}

/// Validates and performs a single opportunity transition, appending one
/// ledger entry. Won and lost are terminal; no transition ever reopens a
/// terminal opportunity.
pub fn transition<S: PipelineStore + ?Sized>(
    store: &mut S,
    opportunity_id: Uuid,
    target: TransitionTarget,
    actor_id: Uuid,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<Opportunity, PipelineError> {
    let mut opp = store
        .opportunity(opportunity_id)?
        .ok_or(PipelineError::NotFound("opportunity"))?;

    if !opp.is_active() {
        return Err(PipelineError::InvalidTransition(format!(
            "opportunity is already {}",
            opp.status
        )));
    }

    let entry = match target {
        TransitionTarget::Stage {
            stage_id,
            proposal_value,
        } => {
            let stage = store
                .stage(stage_id)?
                .ok_or(PipelineError::NotFound("stage"))?;
            if stage.funnel_id != opp.funnel_id {
                return Err(PipelineError::InvalidTransition(
                    "stage belongs to a different funnel".to_string(),
                ));
            }
            if stage.requires_proposal_value
                && proposal_value.or(opp.proposal_value).is_none()
            {
                return Err(PipelineError::MissingRequiredValue);
            }

            let from = opp.stage_id;
            if let Some(value) = proposal_value {
                opp.proposal_value = Some(value);
            }
            opp.stage_id = Some(stage.id);
            opp.stage_entered_at = now;
            opp.updated_at = now;

            OpportunityHistoryEntry::new(
                opp.id,
                actions::STAGE_CHANGE,
                from,
                Some(stage.id),
                Some(actor_id),
                note,
                now,
            )
        }
        TransitionTarget::Won => {
            opp.status = status::WON.to_string();
            opp.converted_at = Some(now);
            opp.updated_at = now;

            OpportunityHistoryEntry::new(
                opp.id,
                actions::WON,
                opp.stage_id,
                opp.stage_id,
                Some(actor_id),
                note,
                now,
            )
        }
        TransitionTarget::Lost { lost_reason_id } => {
            let reason_id = lost_reason_id.ok_or(PipelineError::MissingLostReason)?;
            if !store.lost_reason_active(reason_id)? {
                return Err(PipelineError::MissingLostReason);
            }

            opp.status = status::LOST.to_string();
            opp.lost_reason_id = Some(reason_id);
            opp.updated_at = now;

            OpportunityHistoryEntry::new(
                opp.id,
                actions::LOST,
                opp.stage_id,
                opp.stage_id,
                Some(actor_id),
                note,
                now,
            )
        }
        TransitionTarget::NextFunnel => {
            let current = store
                .funnel(opp.funnel_id)?
                .ok_or(PipelineError::NotFound("funnel"))?;
            let (next_funnel, first_stage) = store
                .first_stage_of_next_funnel(&current)?
                .ok_or_else(|| {
                    PipelineError::InvalidTransition(
                        "no next active funnel with stages".to_string(),
                    )
                })?;
            if first_stage.requires_proposal_value && opp.proposal_value.is_none() {
                return Err(PipelineError::MissingRequiredValue);
            }

            let from = opp.stage_id;
            opp.funnel_id = next_funnel.id;
            opp.stage_id = Some(first_stage.id);
            opp.stage_entered_at = now;
            opp.updated_at = now;

            OpportunityHistoryEntry::new(
                opp.id,
                actions::FUNNEL_ADVANCE,
                from,
                Some(first_stage.id),
                Some(actor_id),
                note,
                now,
            )
        }
    };

    store.apply_transition(&opp, entry)?;
    Ok(opp)
}
