use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::funnel::{Funnel, FunnelStage};
use crate::notifications::{kinds, Notification};
use crate::opportunity::{actions, status, Opportunity, OpportunityHistoryEntry};
use crate::pipeline::conversion::{bulk_mark_won, Contract, ConversionSettings};
use crate::pipeline::sla::run_sla_scan;
use crate::pipeline::store::{PipelineStore, StoreError};
use crate::pipeline::transition::{transition, TransitionTarget};
use crate::pipeline::PipelineError;
use crate::shared::utils::utc_day_bounds;

#[derive(Default)]
struct MemoryStore {
    funnels: Vec<Funnel>,
    stages: Vec<FunnelStage>,
    opportunities: HashMap<Uuid, Opportunity>,
    history: Vec<OpportunityHistoryEntry>,
    notifications: Vec<Notification>,
    contracts: Vec<Contract>,
    contacts: HashMap<Uuid, String>,
    lost_reasons: HashMap<Uuid, bool>,
    fail_contract_for: HashSet<Uuid>,
}

impl PipelineStore for MemoryStore {
    fn funnel(&mut self, id: Uuid) -> Result<Option<Funnel>, StoreError> {
        Ok(self.funnels.iter().find(|f| f.id == id).cloned())
    }

    fn stage(&mut self, id: Uuid) -> Result<Option<FunnelStage>, StoreError> {
        Ok(self.stages.iter().find(|s| s.id == id).cloned())
    }

    fn first_stage_of_next_funnel(
        &mut self,
        after: &Funnel,
    ) -> Result<Option<(Funnel, FunnelStage)>, StoreError> {
        let next = self
            .funnels
            .iter()
            .filter(|f| f.is_active && f.position > after.position)
            .min_by_key(|f| f.position)
            .cloned();
        let Some(next) = next else {
            return Ok(None);
        };
        let first = self
            .stages
            .iter()
            .filter(|s| s.funnel_id == next.id)
            .min_by_key(|s| s.position)
            .cloned();
        Ok(first.map(|stage| (next, stage)))
    }

    fn sla_stages(&mut self) -> Result<Vec<FunnelStage>, StoreError> {
        Ok(self
            .stages
            .iter()
            .filter(|s| s.sla_hours.is_some_and(|h| h > 0))
            .cloned()
            .collect())
    }

    fn opportunity(&mut self, id: Uuid) -> Result<Option<Opportunity>, StoreError> {
        Ok(self.opportunities.get(&id).cloned())
    }

    fn active_in_stage(
        &mut self,
        funnel_id: Uuid,
        stage_id: Uuid,
    ) -> Result<Vec<Opportunity>, StoreError> {
        let mut items: Vec<Opportunity> = self
            .opportunities
            .values()
            .filter(|o| {
                o.funnel_id == funnel_id
                    && o.stage_id == Some(stage_id)
                    && o.status == status::ACTIVE
            })
            .cloned()
            .collect();
        items.sort_by_key(|o| o.created_at);
        Ok(items)
    }

    fn active_in_stages(&mut self, stage_ids: &[Uuid]) -> Result<Vec<Opportunity>, StoreError> {
        let mut items: Vec<Opportunity> = self
            .opportunities
            .values()
            .filter(|o| {
                o.status == status::ACTIVE
                    && o.stage_id.is_some_and(|id| stage_ids.contains(&id))
            })
            .cloned()
            .collect();
        items.sort_by_key(|o| o.created_at);
        Ok(items)
    }

    fn lost_reason_active(&mut self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lost_reasons.get(&id).copied().unwrap_or(false))
    }

    fn contact_name(&mut self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.contacts.get(&id).cloned())
    }

    fn notified_today(
        &mut self,
        user_id: Uuid,
        kind: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let (day_start, day_end) = utc_day_bounds(now);
        Ok(self.notifications.iter().any(|n| {
            n.user_id == user_id
                && n.kind == kind
                && n.link == link
                && n.created_at >= day_start
                && n.created_at < day_end
        }))
    }

    fn insert_notification(&mut self, notification: Notification) -> Result<(), StoreError> {
        self.notifications.push(notification);
        Ok(())
    }

    fn apply_transition(
        &mut self,
        opportunity: &Opportunity,
        entry: OpportunityHistoryEntry,
    ) -> Result<(), StoreError> {
        self.opportunities
            .insert(opportunity.id, opportunity.clone());
        self.history.push(entry);
        Ok(())
    }

    fn convert_won(
        &mut self,
        opportunity_id: Uuid,
        now: DateTime<Utc>,
        contract: Contract,
        entry: OpportunityHistoryEntry,
    ) -> Result<bool, StoreError> {
        let Some(opp) = self.opportunities.get(&opportunity_id) else {
            return Ok(false);
        };
        if opp.status != status::ACTIVE {
            return Ok(false);
        }
        // Atomic unit: an injected failure leaves no partial writes behind.
        if self.fail_contract_for.contains(&opportunity_id) {
            return Err(StoreError::Backend(
                "simulated contract insert failure".to_string(),
            ));
        }
        let opp = self.opportunities.get_mut(&opportunity_id).unwrap();
        opp.status = status::WON.to_string();
        opp.converted_at = Some(now);
        opp.updated_at = now;
        self.contracts.push(contract);
        self.history.push(entry);
        Ok(true)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn funnel(name: &str, position: i32) -> Funnel {
    Funnel {
        id: Uuid::new_v4(),
        name: name.to_string(),
        position,
        is_active: true,
        generates_contract: true,
        contract_prompt: None,
        created_at: t0(),
    }
}

fn stage(
    funnel_id: Uuid,
    name: &str,
    position: i32,
    sla_hours: Option<i32>,
    requires_proposal_value: bool,
) -> FunnelStage {
    FunnelStage {
        id: Uuid::new_v4(),
        funnel_id,
        name: name.to_string(),
        position,
        sla_hours,
        requires_proposal_value,
        color: None,
        created_at: t0(),
    }
}

struct Fixture {
    store: MemoryStore,
    sales: Funnel,
    onboarding: Funnel,
    contato: FunnelStage,
    proposta: FunnelStage,
    negociacao: FunnelStage,
    kickoff: FunnelStage,
    reason_id: Uuid,
}

fn fixture() -> Fixture {
    let sales = funnel("Vendas", 1);
    let onboarding = funnel("Onboarding", 2);
    let contato = stage(sales.id, "Contato", 1, None, false);
    let proposta = stage(sales.id, "Proposta", 2, Some(48), true);
    let negociacao = stage(sales.id, "Negociação", 3, Some(0), false);
    let kickoff = stage(onboarding.id, "Kickoff", 1, None, false);
    let reason_id = Uuid::new_v4();

    let mut store = MemoryStore::default();
    store.funnels = vec![sales.clone(), onboarding.clone()];
    store.stages = vec![
        contato.clone(),
        proposta.clone(),
        negociacao.clone(),
        kickoff.clone(),
    ];
    store.lost_reasons.insert(reason_id, true);

    Fixture {
        store,
        sales,
        onboarding,
        contato,
        proposta,
        negociacao,
        kickoff,
        reason_id,
    }
}

impl Fixture {
    fn add_opportunity(
        &mut self,
        stage: &FunnelStage,
        entered_at: DateTime<Utc>,
        proposal_value: Option<f64>,
    ) -> Uuid {
        let contact_id = Uuid::new_v4();
        self.store
            .contacts
            .insert(contact_id, "Ana Souza".to_string());
        let id = Uuid::new_v4();
        self.store.opportunities.insert(
            id,
            Opportunity {
                id,
                contact_id,
                funnel_id: stage.funnel_id,
                stage_id: Some(stage.id),
                status: status::ACTIVE.to_string(),
                stage_entered_at: entered_at,
                proposal_value,
                converted_at: None,
                lost_reason_id: None,
                owner_id: Uuid::new_v4(),
                created_at: entered_at,
                updated_at: entered_at,
            },
        );
        id
    }
}

fn settings() -> ConversionSettings {
    ConversionSettings {
        product_id: Uuid::new_v4(),
        pb_divisor: 100.0,
    }
}

#[test]
fn stages_without_sla_never_breach() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let negociacao = fx.negociacao.clone();
    let long_ago = t0() - Duration::hours(1000);
    fx.add_opportunity(&contato, long_ago, None);
    // sla_hours = 0 means "no SLA", not "instant breach".
    fx.add_opportunity(&negociacao, long_ago, None);

    let report = run_sla_scan(&mut fx.store, t0()).unwrap();
    assert_eq!(report.notified, 0);
    assert_eq!(report.breached, 0);
    assert!(fx.store.notifications.is_empty());
}

#[test]
fn dwell_exactly_at_threshold_is_not_a_breach() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    let now = t0();
    fx.add_opportunity(&proposta, now - Duration::hours(48), Some(1000.0));

    let report = run_sla_scan(&mut fx.store, now).unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.breached, 0);
    assert!(fx.store.notifications.is_empty());
}

#[test]
fn dwell_one_minute_past_threshold_breaches() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    let now = t0();
    fx.add_opportunity(
        &proposta,
        now - Duration::hours(48) - Duration::minutes(1),
        Some(1000.0),
    );

    let report = run_sla_scan(&mut fx.store, now).unwrap();
    assert_eq!(report.breached, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(fx.store.notifications.len(), 1);
    assert_eq!(fx.store.notifications[0].kind, kinds::SLA_BREACH);
}

#[test]
fn repeated_scans_notify_once_per_day_and_again_next_day() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    let now = t0();
    let id = fx.add_opportunity(&proposta, now - Duration::hours(49), Some(1000.0));

    let first = run_sla_scan(&mut fx.store, now).unwrap();
    assert_eq!(first.notified, 1);

    let second = run_sla_scan(&mut fx.store, now + Duration::hours(3)).unwrap();
    assert_eq!(second.notified, 0);
    assert_eq!(second.skipped_duplicate, 1);
    assert_eq!(fx.store.notifications.len(), 1);

    let next_day = run_sla_scan(&mut fx.store, now + Duration::hours(24)).unwrap();
    assert_eq!(next_day.notified, 1);
    assert_eq!(fx.store.notifications.len(), 2);

    let link = format!("/opportunities/{id}");
    assert!(fx.store.notifications.iter().all(|n| n.link == link));
}

#[test]
fn proposta_48h_scenario_message_and_daily_dedup() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    let entered = t0();
    fx.add_opportunity(&proposta, entered, Some(2500.0));

    let at_47h = run_sla_scan(&mut fx.store, entered + Duration::hours(47)).unwrap();
    assert_eq!(at_47h.notified, 0);

    let at_49h = run_sla_scan(&mut fx.store, entered + Duration::hours(49)).unwrap();
    assert_eq!(at_49h.notified, 1);
    let message = &fx.store.notifications[0].message;
    assert!(message.contains("Ana Souza"), "message: {message}");
    assert!(message.contains("Proposta"), "message: {message}");
    assert!(message.contains("Vendas"), "message: {message}");
    assert!(message.contains("49h"), "message: {message}");
    assert!(message.contains("1h over the 48h SLA"), "message: {message}");

    // One hour later, still the same calendar day: no second notification.
    let at_50h = run_sla_scan(&mut fx.store, entered + Duration::hours(50)).unwrap();
    assert_eq!(at_50h.notified, 0);
    assert_eq!(fx.store.notifications.len(), 1);
}

#[test]
fn scan_survives_a_missing_funnel() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    fx.add_opportunity(&proposta, t0() - Duration::hours(60), Some(1000.0));
    fx.store.funnels.clear();

    let report = run_sla_scan(&mut fx.store, t0()).unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.notified, 0);
    assert!(fx.store.notifications.is_empty());
}

#[test]
fn scan_ignores_an_opportunity_whose_stage_was_deleted() {
    let mut fx = fixture();
    let orphan = stage(fx.sales.id, "Extinta", 9, Some(24), false);
    fx.add_opportunity(&orphan, t0() - Duration::hours(60), None);
    // The stage was never registered, mirroring a deletion mid-scan.

    let report = run_sla_scan(&mut fx.store, t0()).unwrap();
    assert_eq!(report.errors, 0);
    assert_eq!(report.notified, 0);
}

#[test]
fn terminal_opportunities_reject_transitions_without_history() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let proposta = fx.proposta.clone();
    let id = fx.add_opportunity(&contato, t0(), None);

    let won = transition(
        &mut fx.store,
        id,
        TransitionTarget::Won,
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap();
    assert_eq!(won.status, status::WON);
    assert_eq!(won.converted_at, Some(t0()));
    assert_eq!(fx.store.history.len(), 1);

    let err = transition(
        &mut fx.store,
        id,
        TransitionTarget::Stage {
            stage_id: proposta.id,
            proposal_value: Some(100.0),
        },
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
    assert_eq!(fx.store.history.len(), 1);
    assert_eq!(
        fx.store.opportunities[&id].status,
        status::WON,
        "terminal state must not change"
    );
}

#[test]
fn stage_outside_current_funnel_is_rejected() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let kickoff = fx.kickoff.clone();
    let id = fx.add_opportunity(&contato, t0(), None);

    let err = transition(
        &mut fx.store,
        id,
        TransitionTarget::Stage {
            stage_id: kickoff.id,
            proposal_value: None,
        },
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
    assert!(fx.store.history.is_empty());
}

#[test]
fn proposal_stage_requires_a_value_and_commits_it_atomically() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let proposta = fx.proposta.clone();
    let id = fx.add_opportunity(&contato, t0(), None);

    let err = transition(
        &mut fx.store,
        id,
        TransitionTarget::Stage {
            stage_id: proposta.id,
            proposal_value: None,
        },
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::MissingRequiredValue));
    assert_eq!(fx.store.opportunities[&id].stage_id, Some(contato.id));
    assert!(fx.store.history.is_empty());

    let later = t0() + Duration::hours(2);
    let moved = transition(
        &mut fx.store,
        id,
        TransitionTarget::Stage {
            stage_id: proposta.id,
            proposal_value: Some(1500.0),
        },
        Uuid::new_v4(),
        None,
        later,
    )
    .unwrap();
    assert_eq!(moved.stage_id, Some(proposta.id));
    assert_eq!(moved.proposal_value, Some(1500.0));
    assert_eq!(moved.stage_entered_at, later, "dwell clock must reset");
    assert_eq!(fx.store.history.len(), 1);
    let entry = &fx.store.history[0];
    assert_eq!(entry.action, actions::STAGE_CHANGE);
    assert_eq!(entry.from_stage_id, Some(contato.id));
    assert_eq!(entry.to_stage_id, Some(proposta.id));
}

#[test]
fn lost_requires_an_active_reason() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let id = fx.add_opportunity(&contato, t0(), None);

    let err = transition(
        &mut fx.store,
        id,
        TransitionTarget::Lost {
            lost_reason_id: None,
        },
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::MissingLostReason));

    let inactive = Uuid::new_v4();
    fx.store.lost_reasons.insert(inactive, false);
    let err = transition(
        &mut fx.store,
        id,
        TransitionTarget::Lost {
            lost_reason_id: Some(inactive),
        },
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::MissingLostReason));
    assert!(fx.store.history.is_empty());

    let reason_id = fx.reason_id;
    let lost = transition(
        &mut fx.store,
        id,
        TransitionTarget::Lost {
            lost_reason_id: Some(reason_id),
        },
        Uuid::new_v4(),
        None,
        t0(),
    )
    .unwrap();
    assert_eq!(lost.status, status::LOST);
    assert_eq!(lost.lost_reason_id, Some(reason_id));
    assert_eq!(fx.store.history.len(), 1);
    assert_eq!(fx.store.history[0].action, actions::LOST);
}

#[test]
fn advance_seeds_first_stage_of_next_funnel() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let id = fx.add_opportunity(&contato, t0(), None);

    let later = t0() + Duration::hours(5);
    let advanced = transition(
        &mut fx.store,
        id,
        TransitionTarget::NextFunnel,
        Uuid::new_v4(),
        None,
        later,
    )
    .unwrap();
    assert_eq!(advanced.funnel_id, fx.onboarding.id);
    assert_eq!(advanced.stage_id, Some(fx.kickoff.id));
    assert_eq!(advanced.stage_entered_at, later);
    assert_eq!(fx.store.history.len(), 1);
    assert_eq!(fx.store.history[0].action, actions::FUNNEL_ADVANCE);

    // Already in the last funnel: nowhere to advance to.
    let err = transition(
        &mut fx.store,
        id,
        TransitionTarget::NextFunnel,
        Uuid::new_v4(),
        None,
        later,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
}

#[test]
fn bulk_conversion_tolerates_a_failing_item() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    let ids: Vec<Uuid> = (1..=5i64)
        .map(|i| {
            fx.add_opportunity(
                &proposta,
                t0() + Duration::minutes(i),
                Some(i as f64 * 100.0),
            )
        })
        .collect();
    fx.store.fail_contract_for.insert(ids[2]);

    let report = bulk_mark_won(
        &mut fx.store,
        fx.sales.id,
        proposta.id,
        &settings(),
        t0() + Duration::hours(1),
    )
    .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.processed, 4);
    assert_eq!(report.errors, 1);
    assert_eq!(report.results.len(), 5);
    assert_eq!(fx.store.contracts.len(), 4);

    for (i, id) in ids.iter().enumerate() {
        let opp = &fx.store.opportunities[id];
        if i == 2 {
            assert_eq!(opp.status, status::ACTIVE, "failed item stays untouched");
            assert!(opp.converted_at.is_none());
            assert!(!fx.store.contracts.iter().any(|c| c.opportunity_id == *id));
        } else {
            assert_eq!(opp.status, status::WON);
            assert!(opp.converted_at.is_some());
            let contract = fx
                .store
                .contracts
                .iter()
                .find(|c| c.opportunity_id == *id)
                .unwrap();
            let value = (i + 1) as f64 * 100.0;
            assert_eq!(contract.value, value);
            assert_eq!(contract.pbs, value / 100.0);
            assert_eq!(contract.status, "active");
        }
    }

    let item = &report.results[2];
    assert_eq!(item.opportunity_id, ids[2]);
    assert_eq!(item.status, "error");
    assert!(item.error.is_some());

    let won_entries = fx
        .store
        .history
        .iter()
        .filter(|e| e.action == actions::WON)
        .count();
    assert_eq!(won_entries, 4);
    assert!(fx
        .store
        .history
        .iter()
        .all(|e| e.note.as_deref() == Some("Converted by bulk mark-as-won")));
}

#[test]
fn bulk_conversion_defaults_missing_value_to_zero() {
    let mut fx = fixture();
    let contato = fx.contato.clone();
    let id = fx.add_opportunity(&contato, t0(), None);

    let report = bulk_mark_won(&mut fx.store, fx.sales.id, contato.id, &settings(), t0()).unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.results[0].value, Some(0.0));

    let contract = fx
        .store
        .contracts
        .iter()
        .find(|c| c.opportunity_id == id)
        .unwrap();
    assert_eq!(contract.value, 0.0);
    assert_eq!(contract.pbs, 0.0);
}

#[test]
fn rerunning_bulk_conversion_finds_nothing_to_redo() {
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    fx.add_opportunity(&proposta, t0(), Some(300.0));

    let first = bulk_mark_won(&mut fx.store, fx.sales.id, proposta.id, &settings(), t0()).unwrap();
    assert_eq!(first.processed, 1);

    let second = bulk_mark_won(&mut fx.store, fx.sales.id, proposta.id, &settings(), t0()).unwrap();
    assert_eq!(second.total, 0);
    assert_eq!(second.processed, 0);
    assert_eq!(fx.store.contracts.len(), 1);
}

#[test]
fn bulk_conversion_validates_funnel_and_stage() {
    let mut fx = fixture();
    let err = bulk_mark_won(
        &mut fx.store,
        fx.sales.id,
        Uuid::new_v4(),
        &settings(),
        t0(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound("stage")));

    let kickoff = fx.kickoff.clone();
    let err = bulk_mark_won(&mut fx.store, fx.sales.id, kickoff.id, &settings(), t0()).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition(_)));
}

#[test]
fn sla_scan_after_partial_failure_retries_only_unsent() {
    // Two breached opportunities in different funnels; the first scan
    // fails on one (its funnel is gone) and notifies the other. After the
    // repair, a rerun the same day sends only the missing notification.
    let mut fx = fixture();
    let proposta = fx.proposta.clone();
    let followup = stage(fx.onboarding.id, "Follow-up", 2, Some(24), false);
    fx.store.stages.push(followup.clone());
    fx.add_opportunity(&proposta, t0() - Duration::hours(60), Some(100.0));
    fx.add_opportunity(&followup, t0() - Duration::hours(60), None);

    let onboarding_id = fx.onboarding.id;
    fx.store.funnels.retain(|f| f.id != onboarding_id);

    let report = run_sla_scan(&mut fx.store, t0()).unwrap();
    assert_eq!(report.notified, 1);
    assert_eq!(report.errors, 1);

    fx.store.funnels.push(fx.onboarding.clone());
    let report = run_sla_scan(&mut fx.store, t0()).unwrap();
    assert_eq!(report.notified, 1);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(fx.store.notifications.len(), 2);
}
