//! In-process store behind a single mutex. Every operation, including a
//! snapshot, runs under one lock acquisition, which gives it the same
//! atomicity the durable store gets from a transaction.

use super::{apply_handoff_update, apply_update, normalize, sort_work_items, Deadline, Precondition, Store};
use crate::error::{PhasegateError, Result};
use crate::handoff::{Handoff, HandoffId};
use crate::records::{Deliverable, Prd, Retrospective, SubAgentResult, UserStory};
use crate::snapshot::{ChildSummary, WorkItemSnapshot};
use crate::types::HandoffStatus;
use crate::work_item::{WorkItem, WorkItemId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use uuid::Uuid;

type RecordKey = (WorkItemId, Uuid);

#[derive(Debug, Default)]
struct Inner {
    work_items: HashMap<WorkItemId, WorkItem>,
    keys: HashMap<String, WorkItemId>,
    prds: HashMap<WorkItemId, Prd>,
    deliverables: BTreeMap<RecordKey, Deliverable>,
    user_stories: BTreeMap<RecordKey, UserStory>,
    sub_agent_results: BTreeMap<RecordKey, SubAgentResult>,
    retrospectives: BTreeMap<RecordKey, Retrospective>,
    handoffs: HashMap<HandoffId, Handoff>,
}

fn for_item<V: Clone>(map: &BTreeMap<RecordKey, V>, id: WorkItemId) -> Vec<V> {
    map.range((id, Uuid::nil())..=(id, Uuid::from_bytes([0xff; 16])))
        .map(|(_, v)| v.clone())
        .collect()
}

fn drop_for_item<V>(map: &mut BTreeMap<RecordKey, V>, id: WorkItemId) {
    map.retain(|(owner, _), _| *owner != id);
}

impl Inner {
    fn item(&self, id: WorkItemId) -> Result<&WorkItem> {
        self.work_items
            .get(&id)
            .ok_or_else(|| PhasegateError::WorkItemNotFound(id.to_string()))
    }

    fn require_item(&self, id: WorkItemId) -> Result<()> {
        self.item(id).map(|_| ())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

/// Sleep between lock attempts under a bounded deadline, doubling up to the max.
const LOCK_BACKOFF_START: Duration = Duration::from_micros(50);
const LOCK_BACKOFF_MAX: Duration = Duration::from_millis(5);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &str, deadline: Deadline) -> Result<MutexGuard<'_, Inner>> {
        deadline.check(operation)?;
        if !deadline.is_bounded() {
            return self
                .inner
                .lock()
                .map_err(|_| PhasegateError::Store("memory store lock poisoned".to_string()));
        }
        let mut backoff = LOCK_BACKOFF_START;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(PhasegateError::Store(
                        "memory store lock poisoned".to_string(),
                    ))
                }
                Err(TryLockError::WouldBlock) => {
                    deadline.check(operation)?;
                    let nap = deadline.remaining().map_or(backoff, |left| left.min(backoff));
                    std::thread::sleep(nap);
                    backoff = (backoff * 2).min(LOCK_BACKOFF_MAX);
                }
            }
        }
    }
}

impl Store for MemoryStore {
    fn insert_work_item(&self, item: &WorkItem, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("insert_work_item", deadline)?;
        if inner.keys.contains_key(&item.key) {
            return Err(PhasegateError::WorkItemExists(item.key.clone()));
        }
        inner.keys.insert(item.key.clone(), item.id);
        inner.work_items.insert(item.id, item.clone());
        Ok(())
    }

    fn get_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItem> {
        let inner = self.lock("get_work_item", deadline)?;
        inner.item(id).cloned()
    }

    fn find_work_item_by_key(&self, key: &str, deadline: Deadline) -> Result<Option<WorkItem>> {
        let inner = self.lock("find_work_item_by_key", deadline)?;
        Ok(inner
            .keys
            .get(key)
            .and_then(|id| inner.work_items.get(id))
            .cloned())
    }

    fn list_work_items(&self, deadline: Deadline) -> Result<Vec<WorkItem>> {
        let inner = self.lock("list_work_items", deadline)?;
        let mut items: Vec<WorkItem> = inner.work_items.values().cloned().collect();
        sort_work_items(&mut items);
        Ok(items)
    }

    fn list_children(&self, parent_id: WorkItemId, deadline: Deadline) -> Result<Vec<WorkItem>> {
        let inner = self.lock("list_children", deadline)?;
        let mut items: Vec<WorkItem> = inner
            .work_items
            .values()
            .filter(|w| w.parent_id == Some(parent_id))
            .cloned()
            .collect();
        sort_work_items(&mut items);
        Ok(items)
    }

    fn delete_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("delete_work_item", deadline)?;
        let item = inner
            .work_items
            .remove(&id)
            .ok_or_else(|| PhasegateError::WorkItemNotFound(id.to_string()))?;
        inner.keys.remove(&item.key);
        inner.prds.remove(&id);
        drop_for_item(&mut inner.deliverables, id);
        drop_for_item(&mut inner.user_stories, id);
        Ok(())
    }

    fn snapshot(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItemSnapshot> {
        let inner = self.lock("snapshot", deadline)?;
        let item = inner.item(id)?.clone();
        let children = inner
            .work_items
            .values()
            .filter(|w| w.parent_id == Some(id))
            .map(|w| ChildSummary {
                id: w.id,
                key: w.key.clone(),
                status: w.status,
            })
            .collect();
        let handoffs = inner
            .handoffs
            .values()
            .filter(|h| h.work_item_id == id)
            .cloned()
            .collect();
        Ok(normalize(WorkItemSnapshot {
            item,
            prd: inner.prds.get(&id).cloned(),
            deliverables: for_item(&inner.deliverables, id),
            user_stories: for_item(&inner.user_stories, id),
            handoffs,
            sub_agent_results: for_item(&inner.sub_agent_results, id),
            retrospective_count: for_item(&inner.retrospectives, id).len(),
            children,
        }))
    }

    fn update_work_item<F>(
        &self,
        id: WorkItemId,
        expected: &Precondition,
        mutate: F,
        deadline: Deadline,
    ) -> Result<WorkItem>
    where
        F: FnOnce(&mut WorkItem) -> Result<()>,
    {
        let mut inner = self.lock("update_work_item", deadline)?;
        let mut item = inner.item(id)?.clone();
        apply_update(&mut item, expected, mutate)?;
        inner.work_items.insert(id, item.clone());
        Ok(item)
    }

    fn put_prd(&self, prd: &Prd, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("put_prd", deadline)?;
        inner.require_item(prd.work_item_id)?;
        inner.prds.insert(prd.work_item_id, prd.clone());
        Ok(())
    }

    fn upsert_deliverable(&self, deliverable: &Deliverable, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("upsert_deliverable", deadline)?;
        inner.require_item(deliverable.work_item_id)?;
        inner
            .deliverables
            .insert((deliverable.work_item_id, deliverable.id), deliverable.clone());
        Ok(())
    }

    fn upsert_user_story(&self, story: &UserStory, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("upsert_user_story", deadline)?;
        inner.require_item(story.work_item_id)?;
        inner
            .user_stories
            .insert((story.work_item_id, story.id), story.clone());
        Ok(())
    }

    fn append_sub_agent_result(&self, result: &SubAgentResult, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("append_sub_agent_result", deadline)?;
        inner.require_item(result.work_item_id)?;
        inner
            .sub_agent_results
            .insert((result.work_item_id, result.id), result.clone());
        Ok(())
    }

    fn append_retrospective(&self, retro: &Retrospective, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("append_retrospective", deadline)?;
        inner.require_item(retro.work_item_id)?;
        inner
            .retrospectives
            .insert((retro.work_item_id, retro.id), retro.clone());
        Ok(())
    }

    fn insert_pending_handoff(&self, handoff: &Handoff, deadline: Deadline) -> Result<()> {
        let mut inner = self.lock("insert_pending_handoff", deadline)?;
        inner.require_item(handoff.work_item_id)?;
        let edge = handoff.edge();
        if let Some(existing) = inner.handoffs.values().find(|h| {
            h.work_item_id == handoff.work_item_id && h.edge() == edge && h.is_pending()
        }) {
            return Err(PhasegateError::Conflict(format!(
                "{} handoff {} is already pending acceptance",
                edge.handoff_type(),
                existing.id
            )));
        }
        inner.handoffs.insert(handoff.id, handoff.clone());
        Ok(())
    }

    fn get_handoff(&self, id: HandoffId, deadline: Deadline) -> Result<Handoff> {
        let inner = self.lock("get_handoff", deadline)?;
        inner
            .handoffs
            .get(&id)
            .cloned()
            .ok_or_else(|| PhasegateError::HandoffNotFound(id.to_string()))
    }

    fn update_handoff<F>(
        &self,
        id: HandoffId,
        expected_status: HandoffStatus,
        mutate: F,
        deadline: Deadline,
    ) -> Result<Handoff>
    where
        F: FnOnce(&mut Handoff) -> Result<()>,
    {
        let mut inner = self.lock("update_handoff", deadline)?;
        let mut handoff = inner
            .handoffs
            .get(&id)
            .cloned()
            .ok_or_else(|| PhasegateError::HandoffNotFound(id.to_string()))?;
        apply_handoff_update(&mut handoff, expected_status, mutate)?;
        inner.handoffs.insert(id, handoff.clone());
        Ok(handoff)
    }

    fn list_handoffs(&self, work_item_id: WorkItemId, deadline: Deadline) -> Result<Vec<Handoff>> {
        let inner = self.lock("list_handoffs", deadline)?;
        let mut out: Vec<Handoff> = inner
            .handoffs
            .values()
            .filter(|h| h.work_item_id == work_item_id)
            .cloned()
            .collect();
        out.sort_by_key(|h| (h.created_at, h.id));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
