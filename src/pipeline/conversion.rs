use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::opportunity::{actions, OpportunityHistoryEntry};
use crate::pipeline::store::PipelineStore;
use crate::pipeline::PipelineError;
use crate::shared::schema::contracts;

pub const CONTRACT_STATUS_ACTIVE: &str = "active";

/// Created only here (and by the interactive won flow); never mutated by
/// this subsystem afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = contracts)]
pub struct Contract {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub opportunity_id: Uuid,
    pub product_id: Uuid,
    pub owner_id: Uuid,
    pub value: f64,
    pub pbs: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub product_id: Uuid,
    pub pb_divisor: f64,
}

#[derive(Debug, Serialize)]
pub struct ConversionItem {
    pub opportunity_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkConversionReport {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    pub results: Vec<ConversionItem>,
}

/// Converts every active opportunity in the given funnel+stage into a won
/// opportunity plus a contract. Each item is one atomic store unit; a
/// failed item is recorded and the batch continues. Re-running the batch
/// is harmless: only active opportunities are selected, and the store
/// re-checks that precondition inside each item's transaction.
pub fn bulk_mark_won<S: PipelineStore + ?Sized>(
    store: &mut S,
    funnel_id: Uuid,
    stage_id: Uuid,
    settings: &ConversionSettings,
    now: DateTime<Utc>,
) -> Result<BulkConversionReport, PipelineError> {
    let funnel = store
        .funnel(funnel_id)?
        .ok_or(PipelineError::NotFound("funnel"))?;
    let stage = store
        .stage(stage_id)?
        .ok_or(PipelineError::NotFound("stage"))?;
    if stage.funnel_id != funnel.id {
        return Err(PipelineError::InvalidTransition(
            "stage belongs to a different funnel".to_string(),
        ));
    }

    let candidates = store.active_in_stage(funnel_id, stage_id)?;
    let mut report = BulkConversionReport {
        total: candidates.len(),
        processed: 0,
        errors: 0,
        results: Vec::with_capacity(candidates.len()),
    };

    for opp in candidates {
        let value = opp.proposal_value.unwrap_or(0.0);
        let contract = Contract {
            id: Uuid::new_v4(),
            contact_id: opp.contact_id,
            opportunity_id: opp.id,
            product_id: settings.product_id,
            owner_id: opp.owner_id,
            value,
            pbs: value / settings.pb_divisor,
            status: CONTRACT_STATUS_ACTIVE.to_string(),
            created_at: now,
        };
        let entry = OpportunityHistoryEntry::new(
            opp.id,
            actions::WON,
            opp.stage_id,
            opp.stage_id,
            None,
            Some("Converted by bulk mark-as-won".to_string()),
            now,
        );

        match store.convert_won(opp.id, now, contract, entry) {
            Ok(true) => {
                report.processed += 1;
                report.results.push(ConversionItem {
                    opportunity_id: opp.id,
                    status: "ok".to_string(),
                    value: Some(value),
                    error: None,
                });
            }
            Ok(false) => {
                report.errors += 1;
                report.results.push(ConversionItem {
                    opportunity_id: opp.id,
                    status: "error".to_string(),
                    value: None,
                    error: Some("opportunity is no longer active".to_string()),
                });
            }
            Err(e) => {
                error!("Bulk conversion failed for opportunity {}: {e}", opp.id);
                report.errors += 1;
                report.results.push(ConversionItem {
                    opportunity_id: opp.id,
                    status: "error".to_string(),
                    value: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    info!(
        "Bulk mark-as-won on funnel \"{}\" stage \"{}\": {} total, {} processed, {} errors",
        funnel.name, stage.name, report.total, report.processed, report.errors
    );
    Ok(report)
}
