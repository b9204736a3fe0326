//! Property tests for the progress calculator.
//!
//! Case counts follow `PROPTEST_CASES` (default 64).

use phasegate_core::phase::Phase;
use phasegate_core::profile::ProfileRegistry;
use phasegate_core::progress::{compute_progress, ProgressBreakdown, DEFAULT_CONFIDENCE_FLOOR};
use phasegate_core::records::{Deliverable, Prd, SubAgentResult, UserStory};
use phasegate_core::snapshot::WorkItemSnapshot;
use phasegate_core::types::{
    DeliverablePriority, DeliverableStatus, ReviewCategory, ValidationStatus, Verdict,
    WorkItemStatus, WorkItemType,
};
use phasegate_core::work_item::{Objectives, WorkItem};
use proptest::prelude::*;
use std::env;

const DEFAULT_PROPTEST_CASES: u32 = 64;

fn proptest_config() -> ProptestConfig {
    let cases = env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_PROPTEST_CASES);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_type() -> impl Strategy<Value = WorkItemType> {
    prop::sample::select(WorkItemType::all().to_vec())
}

fn arb_priority() -> impl Strategy<Value = DeliverablePriority> {
    prop_oneof![
        Just(DeliverablePriority::Required),
        Just(DeliverablePriority::High),
        Just(DeliverablePriority::Medium),
        Just(DeliverablePriority::Low),
    ]
}

fn arb_deliverable_status() -> impl Strategy<Value = DeliverableStatus> {
    prop_oneof![
        Just(DeliverableStatus::NotStarted),
        Just(DeliverableStatus::InProgress),
        Just(DeliverableStatus::Completed),
        Just(DeliverableStatus::Blocked),
    ]
}

fn arb_validation() -> impl Strategy<Value = ValidationStatus> {
    prop_oneof![
        Just(ValidationStatus::Pending),
        Just(ValidationStatus::Validated),
        Just(ValidationStatus::Failed),
    ]
}

fn arb_verdict() -> impl Strategy<Value = Verdict> {
    prop_oneof![
        Just(Verdict::Pass),
        Just(Verdict::Fail),
        Just(Verdict::Conditional),
    ]
}

prop_compose! {
    fn arb_snapshot()(
        ty in arb_type(),
        active in any::<bool>(),
        objectives in prop::collection::vec("[a-z]{0,6}", 0..3),
        has_prd in any::<bool>(),
        deliverables in prop::collection::vec((arb_priority(), arb_deliverable_status()), 0..6),
        stories in prop::collection::vec((arb_validation(), any::<bool>()), 0..4),
        reviews in prop::collection::vec(
            (prop::sample::select(ReviewCategory::all().to_vec()), arb_verdict(), 0u8..=100),
            0..6,
        ),
        retros in 0usize..3,
    ) -> WorkItemSnapshot {
        let mut item = WorkItem::new("SD-PROP-001", "Property", ty, None).unwrap();
        if active {
            item.status = WorkItemStatus::Active;
        }
        item.objectives = Objectives {
            strategic_objectives: objectives.clone(),
            success_metrics: objectives.clone(),
            risks: objectives,
        };
        let id = item.id;
        let mut snap = WorkItemSnapshot::new(item);
        if has_prd {
            snap.prd = Some(Prd::new(id, "PRD"));
        }
        for (i, (priority, status)) in deliverables.into_iter().enumerate() {
            let mut d = Deliverable::new(id, format!("D{i}"), "code", priority);
            d.set_status(status);
            snap.deliverables.push(d);
        }
        for (i, (validation, evidence)) in stories.into_iter().enumerate() {
            let mut s = UserStory::new(id, format!("US-{i:03}"), "story");
            s.validation_status = validation;
            if evidence {
                s.e2e_evidence = Some(format!("tests/e2e/us_{i}.rs"));
            }
            snap.user_stories.push(s);
        }
        for (category, verdict, confidence) in reviews {
            snap.sub_agent_results.push(SubAgentResult::new(id, category, verdict, confidence));
        }
        snap.retrospective_count = retros;
        snap
    }
}

fn score(snap: &WorkItemSnapshot) -> ProgressBreakdown {
    let res = ProfileRegistry::new().resolve(&snap.item.item_type, &snap.item.key);
    compute_progress(snap, &res, DEFAULT_CONFIDENCE_FLOOR)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn prop_progress_is_idempotent() {
    proptest!(proptest_config(), |(snap in arb_snapshot())| {
        let first = score(&snap);
        let second = score(&snap);
        prop_assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    });
}

#[test]
fn prop_total_is_sum_of_earned_weights() {
    proptest!(proptest_config(), |(snap in arb_snapshot())| {
        let p = score(&snap);
        let earned: u32 = p.per_phase.values().map(|ph| u32::from(ph.earned)).sum();
        prop_assert_eq!(u32::from(p.total_percent), earned);
        prop_assert!(p.total_percent <= 100);
        prop_assert_eq!(p.can_complete, p.total_percent == 100);
        for (phase, ph) in &p.per_phase {
            let expected = if ph.complete { phase.weight() } else { 0 };
            prop_assert_eq!(ph.earned, expected);
        }
    });
}

#[test]
fn prop_completing_a_deliverable_never_lowers_progress() {
    proptest!(proptest_config(), |(snap in arb_snapshot(), pick in any::<prop::sample::Index>())| {
        let open: Vec<usize> = snap
            .deliverables
            .iter()
            .enumerate()
            .filter(|(_, d)| d.priority.is_gating() && !d.is_completed())
            .map(|(i, _)| i)
            .collect();
        prop_assume!(!open.is_empty());

        let before = score(&snap).total_percent;
        let mut after_snap = snap.clone();
        after_snap.deliverables[open[pick.index(open.len())]].set_status(DeliverableStatus::Completed);
        let after = score(&after_snap).total_percent;
        prop_assert!(after >= before, "before {} after {}", before, after);
    });
}

#[test]
fn prop_no_gating_deliverables_means_exec_complete_for_registered_types() {
    proptest!(proptest_config(), |(mut snap in arb_snapshot())| {
        snap.deliverables.retain(|d| !d.priority.is_gating());
        let p = score(&snap);
        let exec = p.phase(Phase::ExecImplementation).unwrap();
        // Generated items have no children, which an orchestrator needs.
        let orchestrator = snap.item.item_type.is(WorkItemType::Orchestrator);
        prop_assert_eq!(exec.complete, !orchestrator);
    });
}
