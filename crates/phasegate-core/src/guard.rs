//! Consistency guard: detection of contradictory work item state and the
//! minimal repair for each kind.
//!
//! Detection is pure over a snapshot. The engine runs it across the store and
//! applies repairs as single-row compare-and-swap updates.

use crate::error::{PhasegateError, Result};
use crate::progress::ProgressBreakdown;
use crate::snapshot::WorkItemSnapshot;
use crate::types::{WorkItemStatus, WorkItemType};
use crate::work_item::{WorkItem, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ViolationKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Lease held on a completed, archived or cancelled item.
    StaleClaim,
    /// Lease past its expiry on a live item.
    ExpiredLease,
    /// Item has children but is not typed orchestrator.
    OrchestratorMismatch,
    /// `parent_id` points at a work item that does not exist.
    OrphanedParent,
    /// Marked completed while computed progress is below 100.
    CompletedBelowThreshold,
}

impl ViolationKind {
    pub fn all() -> &'static [ViolationKind] {
        &[
            ViolationKind::StaleClaim,
            ViolationKind::ExpiredLease,
            ViolationKind::OrchestratorMismatch,
            ViolationKind::OrphanedParent,
            ViolationKind::CompletedBelowThreshold,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::StaleClaim => "stale_claim",
            ViolationKind::ExpiredLease => "expired_lease",
            ViolationKind::OrchestratorMismatch => "orchestrator_mismatch",
            ViolationKind::OrphanedParent => "orphaned_parent",
            ViolationKind::CompletedBelowThreshold => "completed_below_threshold",
        }
    }

    /// Only lease problems are fixed without an operator; everything else may
    /// be a genuine modelling error.
    pub fn is_auto_repairable(self) -> bool {
        matches!(self, ViolationKind::StaleClaim | ViolationKind::ExpiredLease)
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ViolationKind {
    type Err = PhasegateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let norm = s.to_ascii_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == norm)
            .ok_or_else(|| PhasegateError::Validation(format!("unknown violation kind '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// `"{kind}:{work_item_key}"`; stable across sweeps.
    pub id: String,
    pub kind: ViolationKind,
    pub work_item_id: WorkItemId,
    pub work_item_key: String,
    pub detail: String,
}

impl Violation {
    fn new(kind: ViolationKind, item: &WorkItem, detail: String) -> Self {
        Self {
            id: violation_id(kind, &item.key),
            kind,
            work_item_id: item.id,
            work_item_key: item.key.clone(),
            detail,
        }
    }
}

pub fn violation_id(kind: ViolationKind, work_item_key: &str) -> String {
    format!("{kind}:{work_item_key}")
}

/// Split a violation id into its kind and work item key.
pub fn parse_violation_id(id: &str) -> Result<(ViolationKind, &str)> {
    let (kind, key) = id
        .split_once(':')
        .ok_or_else(|| PhasegateError::ViolationNotFound(id.to_string()))?;
    let kind = kind
        .parse()
        .map_err(|_| PhasegateError::ViolationNotFound(id.to_string()))?;
    Ok((kind, key))
}

// ---------------------------------------------------------------------------
// SweepFilter
// ---------------------------------------------------------------------------

/// Restricts a sweep. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFilter {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<ViolationKind>,
}

impl SweepFilter {
    pub fn matches_key(&self, key: &str) -> bool {
        self.keys.is_empty() || self.keys.iter().any(|k| k == key)
    }

    pub fn matches_kind(&self, kind: ViolationKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepairOutcome {
    Repaired,
    RequiresOperator { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairResult {
    pub violation_id: String,
    #[serde(flatten)]
    pub outcome: RepairOutcome,
    pub work_item: WorkItem,
}

/// The reason an operator has to resolve a non-automatic violation.
pub fn operator_reason(kind: ViolationKind) -> Option<&'static str> {
    match kind {
        ViolationKind::StaleClaim | ViolationKind::ExpiredLease => None,
        ViolationKind::OrchestratorMismatch => Some(
            "work item has children but is not typed orchestrator; retype it or detach the children",
        ),
        ViolationKind::OrphanedParent => {
            Some("parent work item no longer exists; reassign or clear the parent")
        }
        ViolationKind::CompletedBelowThreshold => Some(
            "work item is completed but scores below 100; roll it back or record the missing artifacts",
        ),
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Every violation that holds for one work item.
pub fn detect(
    snap: &WorkItemSnapshot,
    progress: &ProgressBreakdown,
    parent_exists: bool,
    now: DateTime<Utc>,
) -> Vec<Violation> {
    let item = &snap.item;
    let mut out = Vec::new();

    if let Some(lease) = &item.lease {
        if item.is_terminal() {
            out.push(Violation::new(
                ViolationKind::StaleClaim,
                item,
                format!(
                    "claimed by session '{}' while status is {}",
                    lease.session_id, item.status
                ),
            ));
        } else if lease.is_expired(now) {
            out.push(Violation::new(
                ViolationKind::ExpiredLease,
                item,
                format!(
                    "lease held by session '{}' expired at {}",
                    lease.session_id, lease.expires_at
                ),
            ));
        }
    }

    if !snap.children.is_empty() && !item.item_type.is(WorkItemType::Orchestrator) {
        out.push(Violation::new(
            ViolationKind::OrchestratorMismatch,
            item,
            format!(
                "has {} child work item(s) but type is {}",
                snap.children.len(),
                item.item_type
            ),
        ));
    }

    if let Some(parent_id) = item.parent_id {
        if !parent_exists {
            out.push(Violation::new(
                ViolationKind::OrphanedParent,
                item,
                format!("parent {parent_id} does not exist"),
            ));
        }
    }

    if item.status == WorkItemStatus::Completed && progress.total_percent < 100 {
        out.push(Violation::new(
            ViolationKind::CompletedBelowThreshold,
            item,
            format!("completed with progress {}%", progress.total_percent),
        ));
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileRegistry;
    use crate::progress::{compute_progress, DEFAULT_CONFIDENCE_FLOOR};
    use crate::snapshot::ChildSummary;
    use crate::work_item::Lease;
    use chrono::Duration;
    use uuid::Uuid;

    fn run(snap: &WorkItemSnapshot, parent_exists: bool) -> Vec<Violation> {
        let res = ProfileRegistry::new().resolve(&snap.item.item_type, &snap.item.key);
        let progress = compute_progress(snap, &res, DEFAULT_CONFIDENCE_FLOOR);
        detect(snap, &progress, parent_exists, Utc::now())
    }

    fn item(ty: WorkItemType) -> WorkItem {
        WorkItem::new("SD-GUARD-001", "Guard", ty, None).unwrap()
    }

    #[test]
    fn clean_item_has_no_violations() {
        let snap = WorkItemSnapshot::new(item(WorkItemType::Feature));
        assert!(run(&snap, true).is_empty());
    }

    #[test]
    fn lease_on_cancelled_item_is_stale() {
        let mut it = item(WorkItemType::Feature);
        it.status = WorkItemStatus::Cancelled;
        it.lease = Some(Lease::new("s1", Utc::now(), Duration::minutes(30)).unwrap());
        let v = run(&WorkItemSnapshot::new(it), true);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].kind, ViolationKind::StaleClaim);
        assert_eq!(v[0].id, "stale_claim:SD-GUARD-001");
    }

    #[test]
    fn expired_lease_on_live_item() {
        let mut it = item(WorkItemType::Feature);
        it.status = WorkItemStatus::Active;
        it.lease = Some(
            Lease::new("s1", Utc::now() - Duration::hours(3), Duration::hours(2)).unwrap(),
        );
        let v = run(&WorkItemSnapshot::new(it), true);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].kind, ViolationKind::ExpiredLease);
    }

    #[test]
    fn children_require_orchestrator_type() {
        let mut snap = WorkItemSnapshot::new(item(WorkItemType::Feature));
        snap.children.push(ChildSummary {
            id: Uuid::new_v4(),
            key: "SD-CHILD-001".into(),
            status: WorkItemStatus::Draft,
        });
        let kinds: Vec<_> = run(&snap, true).into_iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::OrchestratorMismatch]);

        snap.item.item_type = WorkItemType::Orchestrator.into();
        assert!(run(&snap, true).is_empty());
    }

    #[test]
    fn missing_parent_is_orphaned() {
        let mut it = item(WorkItemType::Feature);
        it.parent_id = Some(Uuid::new_v4());
        let v = run(&WorkItemSnapshot::new(it), false);
        assert_eq!(v[0].kind, ViolationKind::OrphanedParent);
    }

    #[test]
    fn completed_below_threshold() {
        let mut it = item(WorkItemType::Feature);
        it.status = WorkItemStatus::Completed;
        let v = run(&WorkItemSnapshot::new(it), true);
        assert!(v
            .iter()
            .any(|v| v.kind == ViolationKind::CompletedBelowThreshold));
    }

    #[test]
    fn violation_id_round_trip() {
        let (kind, key) = parse_violation_id("expired_lease:SD-A-1").unwrap();
        assert_eq!(kind, ViolationKind::ExpiredLease);
        assert_eq!(key, "SD-A-1");
        assert!(matches!(
            parse_violation_id("nonsense"),
            Err(PhasegateError::ViolationNotFound(_))
        ));
        assert!(matches!(
            parse_violation_id("bogus:SD-A-1"),
            Err(PhasegateError::ViolationNotFound(_))
        ));
    }

    #[test]
    fn only_lease_kinds_auto_repair() {
        for kind in ViolationKind::all() {
            assert_eq!(kind.is_auto_repairable(), operator_reason(*kind).is_none());
        }
    }

    #[test]
    fn filter_matching() {
        let f = SweepFilter {
            keys: vec!["SD-1".into()],
            kinds: vec![],
        };
        assert!(f.matches_key("SD-1"));
        assert!(!f.matches_key("SD-2"));
        assert!(f.matches_kind(ViolationKind::OrphanedParent));
    }
}
