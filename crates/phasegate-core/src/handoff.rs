//! Handoff protocol: the structured record exchanged when a work item moves
//! from one phase owner to the next.
//!
//! A handoff is submitted `pending_acceptance` for exactly one adjacent edge,
//! then accepted or rejected. An accepted handoff for the `(current, next)`
//! edge is the sole gate on phase advancement.

use crate::error::{PhasegateError, Result};
use crate::phase::{Edge, Phase};
use crate::types::HandoffStatus;
use crate::work_item::{WorkItem, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type HandoffId = Uuid;

// ---------------------------------------------------------------------------
// HandoffContent
// ---------------------------------------------------------------------------

/// The seven required fields. All must be present and non-blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffContent {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub completeness_report: String,
    #[serde(default)]
    pub deliverables_manifest: Vec<String>,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub known_issues: Vec<String>,
    #[serde(default)]
    pub resource_utilization: String,
    #[serde(default)]
    pub action_items: Vec<String>,
}

fn text_present(s: &str) -> bool {
    !s.trim().is_empty()
}

fn list_present(items: &[String]) -> bool {
    items.iter().any(|s| text_present(s))
}

impl HandoffContent {
    pub fn validate(&self) -> Result<()> {
        let checks: [(&'static str, bool); 7] = [
            ("executive_summary", text_present(&self.executive_summary)),
            ("completeness_report", text_present(&self.completeness_report)),
            ("deliverables_manifest", list_present(&self.deliverables_manifest)),
            ("key_decisions", list_present(&self.key_decisions)),
            ("known_issues", list_present(&self.known_issues)),
            ("resource_utilization", text_present(&self.resource_utilization)),
            ("action_items", list_present(&self.action_items)),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(PhasegateError::MissingField(field)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// HandoffPayload
// ---------------------------------------------------------------------------

/// Caller input for `submit_handoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffPayload {
    pub from_phase: Phase,
    pub to_phase: Phase,
    #[serde(flatten)]
    pub content: HandoffContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: HandoffId,
    pub work_item_id: WorkItemId,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub status: HandoffStatus,
    pub content: HandoffContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Whether an accept call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    AlreadyAccepted,
}

impl Handoff {
    pub fn pending(work_item_id: WorkItemId, edge: Edge, payload: HandoffPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            from_phase: edge.from,
            to_phase: edge.to,
            status: HandoffStatus::PendingAcceptance,
            content: payload.content,
            created_by: payload.created_by,
            created_at: Utc::now(),
            accepted_at: None,
            rejected_at: None,
            rejection_reason: None,
            revoked_at: None,
        }
    }

    pub fn edge(&self) -> Edge {
        Edge {
            from: self.from_phase,
            to: self.to_phase,
        }
    }

    pub fn handoff_type(&self) -> String {
        self.edge().handoff_type()
    }

    pub fn is_pending(&self) -> bool {
        self.status == HandoffStatus::PendingAcceptance
    }

    pub fn is_accepted(&self) -> bool {
        self.status == HandoffStatus::Accepted
    }

    fn already_resolved(&self) -> PhasegateError {
        PhasegateError::AlreadyResolved {
            id: self.id.to_string(),
            status: self.status.to_string(),
        }
    }

    /// Accepting twice is a no-op; accepting a rejected or revoked handoff is an error.
    pub fn accept(&mut self) -> Result<AcceptOutcome> {
        match self.status {
            HandoffStatus::PendingAcceptance => {
                self.status = HandoffStatus::Accepted;
                self.accepted_at = Some(Utc::now());
                Ok(AcceptOutcome::Accepted)
            }
            HandoffStatus::Accepted => Ok(AcceptOutcome::AlreadyAccepted),
            HandoffStatus::Rejected | HandoffStatus::Revoked => Err(self.already_resolved()),
        }
    }

    pub fn reject(&mut self, reason: Option<String>) -> Result<()> {
        if !self.is_pending() {
            return Err(self.already_resolved());
        }
        self.status = HandoffStatus::Rejected;
        self.rejected_at = Some(Utc::now());
        self.rejection_reason = reason;
        Ok(())
    }

    pub fn revoke(&mut self) -> Result<()> {
        if !self.is_accepted() {
            return Err(self.already_resolved());
        }
        self.status = HandoffStatus::Revoked;
        self.revoked_at = Some(Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Protocol rules
// ---------------------------------------------------------------------------

/// Check a submission against the work item's current state and its existing
/// handoffs. Returns the edge the handoff will be scoped to.
///
/// The pending-edge check here is advisory; the store's unique constraint is
/// what makes it hold under concurrent submissions.
pub fn validate_submission(
    item: &WorkItem,
    payload: &HandoffPayload,
    existing: &[Handoff],
) -> Result<Edge> {
    payload.content.validate()?;
    item.ensure_not_terminal("submit a handoff for")?;

    if payload.from_phase != item.phase {
        return Err(PhasegateError::Validation(format!(
            "handoff from {} does not match current phase {} of '{}'",
            payload.from_phase, item.phase, item.key
        )));
    }
    let edge = Edge::new(payload.from_phase, payload.to_phase)?;

    let same_edge = existing
        .iter()
        .filter(|h| h.work_item_id == item.id && h.edge() == edge);
    for h in same_edge {
        match h.status {
            HandoffStatus::Accepted => {
                return Err(PhasegateError::Validation(format!(
                    "{} handoff {} is already accepted; request the transition instead",
                    edge.handoff_type(),
                    h.id
                )))
            }
            HandoffStatus::PendingAcceptance => {
                return Err(PhasegateError::Conflict(format!(
                    "{} handoff {} is already pending acceptance",
                    edge.handoff_type(),
                    h.id
                )))
            }
            HandoffStatus::Rejected | HandoffStatus::Revoked => {}
        }
    }
    Ok(edge)
}

/// True only if an accepted handoff exists for exactly `(item.phase, to)`.
pub fn can_transition(item: &WorkItem, to: Phase, handoffs: &[Handoff]) -> bool {
    let Ok(edge) = Edge::new(item.phase, to) else {
        return false;
    };
    handoffs
        .iter()
        .any(|h| h.work_item_id == item.id && h.edge() == edge && h.is_accepted())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{WorkItemStatus, WorkItemType};

    pub(crate) fn full_content() -> HandoffContent {
        HandoffContent {
            executive_summary: "LEAD approved scope".into(),
            completeness_report: "All objectives captured".into(),
            deliverables_manifest: vec!["PRD outline".into()],
            key_decisions: vec!["Use existing schema".into()],
            known_issues: vec!["None identified".into()],
            resource_utilization: "2h".into(),
            action_items: vec!["PLAN: write PRD".into()],
        }
    }

    fn payload(from: Phase, to: Phase) -> HandoffPayload {
        HandoffPayload {
            from_phase: from,
            to_phase: to,
            content: full_content(),
            created_by: Some("lead-agent".into()),
        }
    }

    fn item() -> WorkItem {
        let mut item = WorkItem::new("SD-HO-001", "Handoffs", WorkItemType::Feature, None).unwrap();
        item.status = WorkItemStatus::Active;
        item
    }

    #[test]
    fn every_field_is_required() {
        assert!(full_content().validate().is_ok());

        let mut c = full_content();
        c.known_issues = vec!["  ".into()];
        assert!(matches!(
            c.validate(),
            Err(PhasegateError::MissingField("known_issues"))
        ));

        let mut c = full_content();
        c.executive_summary.clear();
        assert!(matches!(
            c.validate(),
            Err(PhasegateError::MissingField("executive_summary"))
        ));
    }

    #[test]
    fn submission_must_start_at_current_phase() {
        let item = item();
        let err = validate_submission(&item, &payload(Phase::PlanPrd, Phase::ExecImplementation), &[])
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn submission_cannot_skip_phases() {
        let item = item();
        let err = validate_submission(
            &item,
            &payload(Phase::LeadPreapproval, Phase::ExecImplementation),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, PhasegateError::InvalidTransition { .. }));
    }

    #[test]
    fn duplicate_pending_edge_is_a_conflict() {
        let item = item();
        let p = payload(Phase::LeadPreapproval, Phase::PlanPrd);
        let edge = validate_submission(&item, &p, &[]).unwrap();
        let existing = vec![Handoff::pending(item.id, edge, p.clone())];
        let err = validate_submission(&item, &p, &existing).unwrap_err();
        assert!(matches!(err, PhasegateError::Conflict(_)));
    }

    #[test]
    fn rejected_handoff_frees_the_edge() {
        let item = item();
        let p = payload(Phase::LeadPreapproval, Phase::PlanPrd);
        let edge = validate_submission(&item, &p, &[]).unwrap();
        let mut h = Handoff::pending(item.id, edge, p.clone());
        h.reject(Some("incomplete".into())).unwrap();
        assert!(validate_submission(&item, &p, &[h]).is_ok());
    }

    #[test]
    fn accept_is_idempotent_and_reject_is_not() {
        let item = item();
        let p = payload(Phase::LeadPreapproval, Phase::PlanPrd);
        let mut h = Handoff::pending(item.id, Edge::new(p.from_phase, p.to_phase).unwrap(), p);

        assert_eq!(h.accept().unwrap(), AcceptOutcome::Accepted);
        let first_accepted_at = h.accepted_at;
        assert_eq!(h.accept().unwrap(), AcceptOutcome::AlreadyAccepted);
        assert_eq!(h.accepted_at, first_accepted_at);

        assert!(matches!(
            h.reject(None),
            Err(PhasegateError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn accepting_rejected_handoff_fails() {
        let item = item();
        let p = payload(Phase::LeadPreapproval, Phase::PlanPrd);
        let mut h = Handoff::pending(item.id, Edge::new(p.from_phase, p.to_phase).unwrap(), p);
        h.reject(None).unwrap();
        assert!(matches!(
            h.accept(),
            Err(PhasegateError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn can_transition_requires_accepted_handoff_for_exact_edge() {
        let item = item();
        let p = payload(Phase::LeadPreapproval, Phase::PlanPrd);
        let mut h = Handoff::pending(item.id, Edge::new(p.from_phase, p.to_phase).unwrap(), p);
        assert!(!can_transition(&item, Phase::PlanPrd, std::slice::from_ref(&h)));

        h.accept().unwrap();
        assert!(can_transition(&item, Phase::PlanPrd, std::slice::from_ref(&h)));
        assert!(!can_transition(
            &item,
            Phase::ExecImplementation,
            std::slice::from_ref(&h)
        ));

        h.revoke().unwrap();
        assert!(!can_transition(&item, Phase::PlanPrd, &[h]));
    }

    #[test]
    fn payload_fields_flatten_in_yaml() {
        let yaml = r#"
from_phase: LEAD_preapproval
to_phase: PLAN_prd
executive_summary: Scope approved
completeness_report: Complete
deliverables_manifest: [PRD]
key_decisions: [Reuse tables]
known_issues: [None]
resource_utilization: 1 session
action_items: [Write PRD]
"#;
        let p: HandoffPayload = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(p.to_phase, Phase::PlanPrd);
        assert!(p.content.validate().is_ok());
    }
}
