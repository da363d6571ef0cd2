use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::funnel::FunnelStage;
use crate::notifications::{kinds, Notification};
use crate::opportunity::Opportunity;
use crate::pipeline::store::{PipelineStore, StoreError};

#[derive(Debug, Default, Serialize)]
pub struct SlaScanReport {
    pub scanned: usize,
    pub breached: usize,
    pub notified: usize,
    pub skipped_duplicate: usize,
    pub errors: usize,
}

enum Outcome {
    NotBreached,
    Notified,
    AlreadyNotified,
}

/// Scans every active opportunity sitting in an SLA-bearing stage and
/// notifies the owner of each breach, at most once per opportunity per UTC
/// calendar day. Per-opportunity failures are logged and skipped; the scan
/// always runs to completion. Re-running after a partial failure retries
/// only the unsent notifications, since the dedup probe matches sent ones.
pub fn run_sla_scan<S: PipelineStore + ?Sized>(
    store: &mut S,
    now: DateTime<Utc>,
) -> Result<SlaScanReport, StoreError> {
    let stages = store.sla_stages()?;
    let stage_ids: Vec<Uuid> = stages.iter().map(|s| s.id).collect();
    let stages_by_id: HashMap<Uuid, FunnelStage> =
        stages.into_iter().map(|s| (s.id, s)).collect();

    let candidates = store.active_in_stages(&stage_ids)?;

    let mut report = SlaScanReport {
        scanned: candidates.len(),
        ..Default::default()
    };

    for opp in candidates {
        match check_opportunity(store, &stages_by_id, &opp, now) {
            Ok(Outcome::NotBreached) => {}
            Ok(Outcome::Notified) => {
                report.breached += 1;
                report.notified += 1;
            }
            Ok(Outcome::AlreadyNotified) => {
                report.breached += 1;
                report.skipped_duplicate += 1;
            }
            Err(e) => {
                warn!("SLA check failed for opportunity {}: {e}", opp.id);
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

fn check_opportunity<S: PipelineStore + ?Sized>(
    store: &mut S,
    stages_by_id: &HashMap<Uuid, FunnelStage>,
    opp: &Opportunity,
    now: DateTime<Utc>,
) -> Result<Outcome, StoreError> {
    // The stage may have been deleted or reassigned since the candidate
    // query ran; treat that as "no SLA" rather than failing the scan.
    let stage = match opp.stage_id.and_then(|id| stages_by_id.get(&id)) {
        Some(stage) => stage,
        None => return Ok(Outcome::NotBreached),
    };
    let sla_hours = match stage.effective_sla_hours() {
        Some(h) => h,
        None => return Ok(Outcome::NotBreached),
    };

    let minutes_in_stage = (now - opp.stage_entered_at).num_minutes();
    // Sitting exactly at the threshold is not a breach.
    if minutes_in_stage <= i64::from(sla_hours) * 60 {
        return Ok(Outcome::NotBreached);
    }

    let link = format!("/opportunities/{}", opp.id);
    if store.notified_today(opp.owner_id, kinds::SLA_BREACH, &link, now)? {
        return Ok(Outcome::AlreadyNotified);
    }

    let funnel = store
        .funnel(opp.funnel_id)?
        .ok_or_else(|| StoreError::Backend(format!("funnel {} missing", opp.funnel_id)))?;
    let contact = store
        .contact_name(opp.contact_id)?
        .unwrap_or_else(|| "Unknown contact".to_string());

    let hours_in_stage = (minutes_in_stage as f64 / 60.0).round() as i64;
    let overdue = hours_in_stage - i64::from(sla_hours);

    store.insert_notification(Notification {
        id: Uuid::new_v4(),
        user_id: opp.owner_id,
        kind: kinds::SLA_BREACH.to_string(),
        title: format!("SLA breached: {}", stage.name),
        message: format!(
            "{contact} has been in stage \"{}\" of funnel \"{}\" for {hours_in_stage}h, \
             {overdue}h over the {sla_hours}h SLA",
            stage.name, funnel.name
        ),
        link,
        is_read: false,
        created_at: now,
    })?;

    Ok(Outcome::Notified)
}
