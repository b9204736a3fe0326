//! Weighted progress calculation.
//!
//! Every phase is binary: it earns its full weight or nothing. Each phase is
//! a list of requirement checks, and every check goes through [`evaluate`],
//! the one place where zero records are interpreted. Zero records for a
//! requirement the profile does not mandate is vacuously met; zero records
//! for a mandated requirement is missing.

use crate::error::{PhasegateError, Result};
use crate::phase::Phase;
use crate::profile::{Resolution, ValidationProfile};
use crate::snapshot::WorkItemSnapshot;
use crate::types::{HandoffStatus, WorkItemStatus};
use crate::work_item::WorkItemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CONFIDENCE_FLOOR: u8 = 85;

// ---------------------------------------------------------------------------
// RequirementCheck
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Records exist and all of them satisfy the requirement.
    Met,
    /// No records, and the profile does not mandate any.
    Vacuous,
    /// No records, but the profile mandates them.
    Missing,
    /// Records exist and at least one does not satisfy the requirement.
    Unmet,
}

impl CheckOutcome {
    pub fn is_satisfied(self) -> bool {
        matches!(self, CheckOutcome::Met | CheckOutcome::Vacuous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementCheck {
    pub name: String,
    pub mandated: bool,
    pub total: usize,
    pub satisfied: usize,
    pub outcome: CheckOutcome,
}

/// The shared zero-records rule.
pub fn evaluate(
    name: impl Into<String>,
    mandated: bool,
    total: usize,
    satisfied: usize,
) -> RequirementCheck {
    let outcome = match (total, mandated) {
        (0, false) => CheckOutcome::Vacuous,
        (0, true) => CheckOutcome::Missing,
        _ if satisfied >= total => CheckOutcome::Met,
        _ => CheckOutcome::Unmet,
    };
    RequirementCheck {
        name: name.into(),
        mandated,
        total,
        satisfied: satisfied.min(total),
        outcome,
    }
}

// ---------------------------------------------------------------------------
// ProgressBreakdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub weight: u8,
    pub earned: u8,
    pub complete: bool,
    pub signals: Vec<RequirementCheck>,
}

impl PhaseProgress {
    fn from_checks(phase: Phase, signals: Vec<RequirementCheck>) -> Self {
        let complete = signals.iter().all(|c| c.outcome.is_satisfied());
        let weight = phase.weight();
        Self {
            weight,
            earned: if complete { weight } else { 0 },
            complete,
            signals,
        }
    }

    /// Mandated requirements with no records at all.
    pub fn missing(&self) -> impl Iterator<Item = &RequirementCheck> {
        self.signals
            .iter()
            .filter(|c| c.outcome == CheckOutcome::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBreakdown {
    pub work_item_id: WorkItemId,
    pub work_item_key: String,
    pub current_phase: Phase,
    pub total_percent: u8,
    pub can_complete: bool,
    /// The work item's type was unregistered and the conservative profile was used.
    pub profile_fallback: bool,
    pub per_phase: BTreeMap<Phase, PhaseProgress>,
}

impl ProgressBreakdown {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseProgress> {
        self.per_phase.get(&phase)
    }

    /// Fail with `MissingArtifact` if `phase` lacks a mandated artifact.
    pub fn ensure_artifacts_present(&self, phase: Phase) -> Result<()> {
        let first_missing = self.phase(phase).and_then(|p| p.missing().next());
        match first_missing {
            Some(check) => Err(PhasegateError::MissingArtifact {
                artifact: check.name.clone(),
                phase: phase.to_string(),
            }),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Score a snapshot. Pure: the same snapshot, resolution and floor always
/// produce the same breakdown.
pub fn compute_progress(
    snapshot: &WorkItemSnapshot,
    resolution: &Resolution,
    confidence_floor: u8,
) -> ProgressBreakdown {
    let profile = &resolution.profile;
    let per_phase: BTreeMap<Phase, PhaseProgress> = Phase::all()
        .iter()
        .map(|&phase| {
            let checks = phase_checks(phase, snapshot, profile, confidence_floor);
            (phase, PhaseProgress::from_checks(phase, checks))
        })
        .collect();

    let total: u32 = per_phase.values().map(|p| u32::from(p.earned)).sum();
    let total_percent = total.min(100) as u8;

    ProgressBreakdown {
        work_item_id: snapshot.item.id,
        work_item_key: snapshot.item.key.clone(),
        current_phase: snapshot.item.phase,
        total_percent,
        can_complete: total_percent == 100,
        profile_fallback: resolution.fallback,
        per_phase,
    }
}

fn phase_checks(
    phase: Phase,
    snap: &WorkItemSnapshot,
    profile: &ValidationProfile,
    floor: u8,
) -> Vec<RequirementCheck> {
    match phase {
        Phase::LeadPreapproval => lead_preapproval(snap),
        Phase::PlanPrd => plan_prd(snap, profile),
        Phase::ExecImplementation => exec_implementation(snap, profile),
        Phase::PlanVerification => plan_verification(snap, profile, floor),
        Phase::LeadFinalApproval => lead_final_approval(snap, profile),
    }
}

fn lead_preapproval(snap: &WorkItemSnapshot) -> Vec<RequirementCheck> {
    let o = &snap.item.objectives;
    let counts = [
        ("strategic_objectives", o.objective_count()),
        ("success_metrics", o.metric_count()),
        ("risks", o.risk_count()),
    ];
    let mut checks: Vec<RequirementCheck> = counts
        .iter()
        .map(|&(name, n)| evaluate(name, true, n, n))
        .collect();
    let approved = usize::from(snap.item.status != WorkItemStatus::Draft);
    checks.push(evaluate("status_beyond_draft", true, 1, approved));
    checks
}

fn plan_prd(snap: &WorkItemSnapshot, profile: &ValidationProfile) -> Vec<RequirementCheck> {
    let prd = usize::from(snap.prd.is_some());
    let stories = snap.user_stories.len();
    vec![
        evaluate("prd", profile.requires_prd, prd, prd),
        evaluate("user_stories", profile.requires_user_stories, stories, stories),
    ]
}

fn exec_implementation(
    snap: &WorkItemSnapshot,
    profile: &ValidationProfile,
) -> Vec<RequirementCheck> {
    let gating: Vec<_> = snap.gating_deliverables().collect();
    let done = gating.iter().filter(|d| d.is_completed()).count();
    let mut checks = vec![evaluate(
        "deliverables",
        profile.requires_deliverables,
        gating.len(),
        done,
    )];

    if profile.requires_children_complete {
        let children_done = snap
            .children
            .iter()
            .filter(|c| c.status == WorkItemStatus::Completed)
            .count();
        // An orchestrator with no children has nothing to orchestrate.
        checks.push(evaluate(
            "children_completed",
            true,
            snap.children.len(),
            children_done,
        ));
    }
    checks
}

fn plan_verification(
    snap: &WorkItemSnapshot,
    profile: &ValidationProfile,
    floor: u8,
) -> Vec<RequirementCheck> {
    let validated = snap
        .user_stories
        .iter()
        .filter(|s| s.counts_as_validated(profile.requires_e2e_evidence))
        .count();
    let mut checks = vec![evaluate(
        "user_stories_validated",
        profile.requires_user_stories,
        snap.user_stories.len(),
        validated,
    )];

    for category in profile.applicable_categories() {
        let latest = snap.latest_result(category);
        let total = usize::from(latest.is_some());
        let passing = usize::from(latest.is_some_and(|r| r.passes(floor)));
        checks.push(evaluate(format!("review:{category}"), true, total, passing));
    }
    checks
}

fn lead_final_approval(
    snap: &WorkItemSnapshot,
    profile: &ValidationProfile,
) -> Vec<RequirementCheck> {
    let retros = snap.retrospective_count;
    let accepted = snap.handoffs_with_status(HandoffStatus::Accepted).count();
    let pending = snap
        .handoffs_with_status(HandoffStatus::PendingAcceptance)
        .count();
    vec![
        evaluate("retrospective", profile.requires_retrospective, retros, retros),
        evaluate("handoffs_accepted", false, accepted + pending, accepted),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
