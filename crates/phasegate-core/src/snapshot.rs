use crate::handoff::Handoff;
use crate::records::{Deliverable, Prd, SubAgentResult, UserStory};
use crate::types::{HandoffStatus, ReviewCategory, WorkItemStatus};
use crate::work_item::{WorkItem, WorkItemId};
use serde::{Deserialize, Serialize};

/// Minimal view of a child work item, enough for orchestrator checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub id: WorkItemId,
    pub key: String,
    pub status: WorkItemStatus,
}

/// A work item and every sub-record the progress calculator reads, captured
/// in a single read transaction.
///
/// Stores return sub-record vectors ordered by creation time, then id, so two
/// snapshots of unchanged state compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemSnapshot {
    pub item: WorkItem,
    pub prd: Option<Prd>,
    pub deliverables: Vec<Deliverable>,
    pub user_stories: Vec<UserStory>,
    pub handoffs: Vec<Handoff>,
    pub sub_agent_results: Vec<SubAgentResult>,
    pub retrospective_count: usize,
    pub children: Vec<ChildSummary>,
}

impl WorkItemSnapshot {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            prd: None,
            deliverables: Vec::new(),
            user_stories: Vec::new(),
            handoffs: Vec::new(),
            sub_agent_results: Vec::new(),
            retrospective_count: 0,
            children: Vec::new(),
        }
    }

    pub fn gating_deliverables(&self) -> impl Iterator<Item = &Deliverable> {
        self.deliverables.iter().filter(|d| d.priority.is_gating())
    }

    /// Most recent verdict for a review category. Later results supersede earlier ones.
    pub fn latest_result(&self, category: ReviewCategory) -> Option<&SubAgentResult> {
        self.sub_agent_results
            .iter()
            .filter(|r| r.category == category)
            .max_by_key(|r| r.recorded_at)
    }

    pub fn handoffs_with_status(&self, status: HandoffStatus) -> impl Iterator<Item = &Handoff> {
        self.handoffs.iter().filter(move |h| h.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Verdict, WorkItemType};
    use chrono::Duration;

    #[test]
    fn latest_result_wins() {
        let item = WorkItem::new("SD-SNAP-001", "Snap", WorkItemType::Feature, None).unwrap();
        let mut snap = WorkItemSnapshot::new(item.clone());

        let mut old = SubAgentResult::new(item.id, ReviewCategory::Testing, Verdict::Fail, 95);
        old.recorded_at -= Duration::minutes(10);
        let new = SubAgentResult::new(item.id, ReviewCategory::Testing, Verdict::Pass, 90);
        snap.sub_agent_results = vec![new.clone(), old];

        assert_eq!(snap.latest_result(ReviewCategory::Testing), Some(&new));
        assert!(snap.latest_result(ReviewCategory::Security).is_none());
    }
}
