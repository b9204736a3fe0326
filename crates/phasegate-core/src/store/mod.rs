//! The transactional datastore the engine runs against.
//!
//! Every method takes a [`Deadline`]. An expired deadline surfaces as
//! `UpstreamTimeout` and is never retried here; retry policy belongs to the
//! caller.

pub mod db;
pub mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

use crate::error::{PhasegateError, Result};
use crate::handoff::{Handoff, HandoffId};
use crate::phase::Phase;
use crate::records::{Deliverable, Prd, Retrospective, SubAgentResult, UserStory};
use crate::snapshot::WorkItemSnapshot;
use crate::types::{HandoffStatus, WorkItemStatus};
use crate::work_item::{WorkItem, WorkItemId};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Caller-supplied bound on how long a store call may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// No bound. Intended for tests and embedding callers that enforce their own.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_bounded(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(PhasegateError::UpstreamTimeout {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Precondition
// ---------------------------------------------------------------------------

/// Expected state of a work item row for a compare-and-swap update.
/// Unset fields are not compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precondition {
    pub revision: Option<u64>,
    pub status: Option<WorkItemStatus>,
    pub phase: Option<Phase>,
}

impl Precondition {
    /// Match the row exactly as it was read.
    pub fn of(item: &WorkItem) -> Self {
        Self {
            revision: Some(item.revision),
            status: Some(item.status),
            phase: Some(item.phase),
        }
    }

    pub fn revision(revision: u64) -> Self {
        Self {
            revision: Some(revision),
            ..Self::default()
        }
    }

    pub fn check(&self, current: &WorkItem) -> Result<()> {
        let stale = |what: &str, expected: String, found: String| {
            Err(PhasegateError::Conflict(format!(
                "work item '{}' changed concurrently: expected {what} {expected}, found {found}",
                current.key
            )))
        };
        if let Some(rev) = self.revision {
            if rev != current.revision {
                return stale("revision", rev.to_string(), current.revision.to_string());
            }
        }
        if let Some(status) = self.status {
            if status != current.status {
                return stale("status", status.to_string(), current.status.to_string());
            }
        }
        if let Some(phase) = self.phase {
            if phase != current.phase {
                return stale("phase", phase.to_string(), current.phase.to_string());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub trait Store: Send + Sync {
    /// Fails with `WorkItemExists` if the key is taken.
    fn insert_work_item(&self, item: &WorkItem, deadline: Deadline) -> Result<()>;

    fn get_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItem>;

    fn find_work_item_by_key(&self, key: &str, deadline: Deadline) -> Result<Option<WorkItem>>;

    /// All work items, oldest first.
    fn list_work_items(&self, deadline: Deadline) -> Result<Vec<WorkItem>>;

    fn list_children(&self, parent_id: WorkItemId, deadline: Deadline) -> Result<Vec<WorkItem>>;

    /// Removes the work item with its PRD, deliverables and user stories.
    /// Handoffs, sub-agent results and retrospectives are audit history and stay.
    fn delete_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<()>;

    /// The work item and its sub-records from one consistent read.
    fn snapshot(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItemSnapshot>;

    /// Single-row compare-and-swap. `mutate` runs only if the stored row matches
    /// `expected`; the store then bumps `revision` and `updated_at`.
    fn update_work_item<F>(
        &self,
        id: WorkItemId,
        expected: &Precondition,
        mutate: F,
        deadline: Deadline,
    ) -> Result<WorkItem>
    where
        F: FnOnce(&mut WorkItem) -> Result<()>;

    fn put_prd(&self, prd: &Prd, deadline: Deadline) -> Result<()>;

    fn upsert_deliverable(&self, deliverable: &Deliverable, deadline: Deadline) -> Result<()>;

    fn upsert_user_story(&self, story: &UserStory, deadline: Deadline) -> Result<()>;

    fn append_sub_agent_result(&self, result: &SubAgentResult, deadline: Deadline) -> Result<()>;

    fn append_retrospective(&self, retro: &Retrospective, deadline: Deadline) -> Result<()>;

    /// Fails with `Conflict` if a pending handoff already exists for the same
    /// work item and edge. The check and insert are one atomic step.
    fn insert_pending_handoff(&self, handoff: &Handoff, deadline: Deadline) -> Result<()>;

    fn get_handoff(&self, id: HandoffId, deadline: Deadline) -> Result<Handoff>;

    /// Compare-and-swap on handoff status.
    fn update_handoff<F>(
        &self,
        id: HandoffId,
        expected_status: HandoffStatus,
        mutate: F,
        deadline: Deadline,
    ) -> Result<Handoff>
    where
        F: FnOnce(&mut Handoff) -> Result<()>;

    /// Handoffs for one work item, oldest first.
    fn list_handoffs(&self, work_item_id: WorkItemId, deadline: Deadline) -> Result<Vec<Handoff>>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Apply a checked update to a loaded row.
pub(crate) fn apply_update<F>(item: &mut WorkItem, expected: &Precondition, mutate: F) -> Result<()>
where
    F: FnOnce(&mut WorkItem) -> Result<()>,
{
    expected.check(item)?;
    let (id, key, parent) = (item.id, item.key.clone(), item.parent_id);
    mutate(item)?;
    if item.id != id || item.key != key || item.parent_id != parent {
        return Err(PhasegateError::Store(format!(
            "update of '{key}' attempted to change its identity"
        )));
    }
    item.revision += 1;
    item.updated_at = chrono::Utc::now();
    Ok(())
}

pub(crate) fn apply_handoff_update<F>(
    handoff: &mut Handoff,
    expected_status: HandoffStatus,
    mutate: F,
) -> Result<()>
where
    F: FnOnce(&mut Handoff) -> Result<()>,
{
    if handoff.status != expected_status {
        return Err(PhasegateError::Conflict(format!(
            "handoff {} changed concurrently: expected {expected_status}, found {}",
            handoff.id, handoff.status
        )));
    }
    mutate(handoff)
}

/// Put sub-record vectors in a stable order so equal state yields equal snapshots.
pub(crate) fn normalize(mut snap: WorkItemSnapshot) -> WorkItemSnapshot {
    snap.deliverables.sort_by_key(|d| (d.created_at, d.id));
    snap.user_stories.sort_by_key(|s| (s.created_at, s.id));
    snap.handoffs.sort_by_key(|h| (h.created_at, h.id));
    snap.sub_agent_results.sort_by_key(|r| (r.recorded_at, r.id));
    snap.children.sort_by(|a, b| a.key.cmp(&b.key));
    snap
}

pub(crate) fn sort_work_items(items: &mut [WorkItem]) {
    items.sort_by(|a, b| (a.created_at, &a.key).cmp(&(b.created_at, &b.key)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkItemType;

    #[test]
    fn expired_deadline_is_upstream_timeout() {
        let d = Deadline::after(Duration::ZERO);
        let err = d.check("snapshot").unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, PhasegateError::UpstreamTimeout { .. }));
        assert!(Deadline::none().check("snapshot").is_ok());
    }

    #[test]
    fn remaining_shrinks_to_zero() {
        assert_eq!(Deadline::none().remaining(), None);
        assert_eq!(Deadline::after(Duration::ZERO).remaining(), Some(Duration::ZERO));
        let left = Deadline::after(Duration::from_secs(60)).remaining().unwrap();
        assert!(left > Duration::from_secs(50) && left <= Duration::from_secs(60));
    }

    #[test]
    fn precondition_detects_stale_revision() {
        let mut item = WorkItem::new("SD-CAS-001", "Cas", WorkItemType::Bugfix, None).unwrap();
        let expected = Precondition::of(&item);
        apply_update(&mut item, &expected, |_| Ok(())).unwrap();
        assert_eq!(item.revision, 1);

        let err = apply_update(&mut item, &expected, |_| Ok(())).unwrap_err();
        assert!(matches!(err, PhasegateError::Conflict(_)));
    }

    #[test]
    fn update_cannot_change_identity() {
        let mut item = WorkItem::new("SD-CAS-002", "Cas", WorkItemType::Bugfix, None).unwrap();
        let err = apply_update(&mut item, &Precondition::default(), |i| {
            i.key = "SD-OTHER".into();
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, PhasegateError::Store(_)));
    }
}
