//! Sub-records accumulated under a work item as it moves through phases.
//!
//! Deliverables, user stories and the PRD are owned by the work item and are
//! deleted with it. Sub-agent results and retrospectives are append-only
//! history.

use crate::types::{
    DeliverablePriority, DeliverableStatus, ReviewCategory, StoryStatus, ValidationStatus, Verdict,
};
use crate::work_item::WorkItemId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Prd
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prd {
    pub work_item_id: WorkItemId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Prd {
    pub fn new(work_item_id: WorkItemId, title: impl Into<String>) -> Self {
        Self {
            work_item_id,
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Deliverable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: Uuid,
    pub work_item_id: WorkItemId,
    pub name: String,
    pub kind: String,
    pub priority: DeliverablePriority,
    pub completion_status: DeliverableStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deliverable {
    pub fn new(
        work_item_id: WorkItemId,
        name: impl Into<String>,
        kind: impl Into<String>,
        priority: DeliverablePriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            name: name.into(),
            kind: kind.into(),
            priority,
            completion_status: DeliverableStatus::NotStarted,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion_status == DeliverableStatus::Completed
    }

    pub fn set_status(&mut self, status: DeliverableStatus) {
        self.completion_status = status;
        self.completed_at = match status {
            DeliverableStatus::Completed => Some(Utc::now()),
            _ => None,
        };
    }
}

// ---------------------------------------------------------------------------
// UserStory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub id: Uuid,
    pub work_item_id: WorkItemId,
    /// Human-readable key, e.g. `US-001`.
    pub story_key: String,
    pub title: String,
    pub status: StoryStatus,
    pub validation_status: ValidationStatus,
    /// Reference to end-to-end test evidence (test path, run id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2e_evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserStory {
    pub fn new(
        work_item_id: WorkItemId,
        story_key: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            story_key: story_key.into(),
            title: title.into(),
            status: StoryStatus::Draft,
            validation_status: ValidationStatus::Pending,
            e2e_evidence: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_e2e_evidence(&self) -> bool {
        self.e2e_evidence
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
    }

    /// Whether the story counts toward PLAN_verification. End-to-end evidence is
    /// demanded per story only when the profile asks for it.
    pub fn counts_as_validated(&self, requires_e2e_evidence: bool) -> bool {
        self.validation_status == ValidationStatus::Validated
            && (!requires_e2e_evidence || self.has_e2e_evidence())
    }
}

// ---------------------------------------------------------------------------
// SubAgentResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub id: Uuid,
    pub work_item_id: WorkItemId,
    pub category: ReviewCategory,
    pub verdict: Verdict,
    /// 0..=100
    pub confidence: u8,
    pub recorded_at: DateTime<Utc>,
}

impl SubAgentResult {
    pub fn new(
        work_item_id: WorkItemId,
        category: ReviewCategory,
        verdict: Verdict,
        confidence: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            category,
            verdict,
            confidence: confidence.min(100),
            recorded_at: Utc::now(),
        }
    }

    pub fn passes(&self, confidence_floor: u8) -> bool {
        !self.verdict.is_failing() && self.confidence >= confidence_floor
    }
}

// ---------------------------------------------------------------------------
// Retrospective
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrospective {
    pub id: Uuid,
    pub work_item_id: WorkItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Retrospective {
    pub fn new(work_item_id: WorkItemId, summary: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            summary,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_validation_respects_e2e_flag() {
        let mut story = UserStory::new(Uuid::new_v4(), "US-001", "Login");
        story.validation_status = ValidationStatus::Validated;
        assert!(story.counts_as_validated(false));
        assert!(!story.counts_as_validated(true));

        story.e2e_evidence = Some("tests/e2e/login.spec.ts".into());
        assert!(story.counts_as_validated(true));
    }

    #[test]
    fn blank_evidence_is_not_evidence() {
        let mut story = UserStory::new(Uuid::new_v4(), "US-002", "Logout");
        story.e2e_evidence = Some("   ".into());
        assert!(!story.has_e2e_evidence());
    }

    #[test]
    fn sub_agent_floor_and_verdict() {
        let id = Uuid::new_v4();
        assert!(SubAgentResult::new(id, ReviewCategory::Testing, Verdict::Pass, 85).passes(85));
        assert!(!SubAgentResult::new(id, ReviewCategory::Testing, Verdict::Pass, 84).passes(85));
        assert!(
            SubAgentResult::new(id, ReviewCategory::Testing, Verdict::Conditional, 90).passes(85)
        );
        assert!(!SubAgentResult::new(id, ReviewCategory::Testing, Verdict::Fail, 99).passes(85));
    }

    #[test]
    fn deliverable_completion_timestamps() {
        let mut d = Deliverable::new(Uuid::new_v4(), "API", "api", DeliverablePriority::Required);
        assert!(!d.is_completed());
        d.set_status(DeliverableStatus::Completed);
        assert!(d.is_completed());
        assert!(d.completed_at.is_some());
        d.set_status(DeliverableStatus::InProgress);
        assert!(d.completed_at.is_none());
    }
}
