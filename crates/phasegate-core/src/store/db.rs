//! Durable storage for work items and their sub-records using redb.
//!
//! # Table design
//!
//! Values are JSON. Work items are keyed by their 16-byte uuid; every
//! sub-record table uses a 32-byte composite key:
//! ```text
//! [ work_item_id: 16 bytes | record_id: 16 bytes ]
//! ```
//! so one range scan over `[id ++ 0x00..; id ++ 0xff..]` returns exactly one
//! work item's records.
//!
//! `PENDING_EDGES` holds one row per `(work_item, from, to)` edge with a
//! pending handoff. Writers are serialised by redb, so checking and
//! inserting that row inside one write transaction is the unique constraint.
//! Reads run in a single MVCC read transaction and see a consistent snapshot.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::{
    apply_handoff_update, apply_update, normalize, sort_work_items, Deadline, Precondition, Store,
};
use crate::error::{PhasegateError, Result};
use crate::handoff::{Handoff, HandoffId};
use crate::phase::Edge;
use crate::records::{Deliverable, Prd, Retrospective, SubAgentResult, UserStory};
use crate::snapshot::{ChildSummary, WorkItemSnapshot};
use crate::types::HandoffStatus;
use crate::work_item::{WorkItem, WorkItemId};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: work item uuid. Value: JSON `WorkItem`.
const WORK_ITEMS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("work_items");
/// Key: work item key string. Value: work item uuid.
const WORK_ITEM_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("work_item_keys");
/// Key: parent uuid ++ child uuid. Value: empty.
const CHILDREN: TableDefinition<&[u8], &[u8]> = TableDefinition::new("children");
/// Key: work item uuid. Value: JSON `Prd`.
const PRDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("prds");
const DELIVERABLES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("deliverables");
const USER_STORIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("user_stories");
const SUB_AGENT_RESULTS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("sub_agent_results");
const RETROSPECTIVES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("retrospectives");
/// Key: work item uuid ++ handoff uuid. Value: JSON `Handoff`.
const HANDOFFS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("handoffs");
/// Key: handoff uuid. Value: owning work item uuid.
const HANDOFF_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("handoff_index");
/// Key: work item uuid ++ from phase index ++ to phase index. Value: handoff uuid.
const PENDING_EDGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending_edges");

// ---------------------------------------------------------------------------
// Key and value helpers
// ---------------------------------------------------------------------------

const EMPTY: &[u8] = &[];

fn db_err(e: impl std::fmt::Display) -> PhasegateError {
    PhasegateError::Store(e.to_string())
}

fn record_key(owner: Uuid, id: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(owner.as_bytes());
    key[16..].copy_from_slice(id.as_bytes());
    key
}

/// Inclusive bounds covering every composite key owned by `owner`.
fn owner_range(owner: Uuid) -> ([u8; 32], [u8; 32]) {
    let mut lower = [0u8; 32];
    lower[..16].copy_from_slice(owner.as_bytes());
    let mut upper = lower;
    upper[16..].fill(0xff);
    (lower, upper)
}

fn edge_key(work_item_id: Uuid, edge: Edge) -> [u8; 18] {
    let mut key = [0u8; 18];
    key[..16].copy_from_slice(work_item_id.as_bytes());
    key[16] = edge.from.index() as u8;
    key[17] = edge.to.index() as u8;
    key
}

fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(db_err)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn get_json<T, Tb>(table: &Tb, key: &[u8]) -> Result<Option<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key).map_err(db_err)? {
        Some(guard) => decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn scan_owner<T, Tb>(table: &Tb, owner: Uuid) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<&'static [u8], &'static [u8]>,
{
    let (lower, upper) = owner_range(owner);
    let mut out = Vec::new();
    for entry in table
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(db_err)?
    {
        let (_, v) = entry.map_err(db_err)?;
        out.push(decode(v.value())?);
    }
    Ok(out)
}

fn owner_keys<Tb>(table: &Tb, owner: Uuid) -> Result<Vec<Vec<u8>>>
where
    Tb: ReadableTable<&'static [u8], &'static [u8]>,
{
    let (lower, upper) = owner_range(owner);
    let mut out = Vec::new();
    for entry in table
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(db_err)?
    {
        let (k, _) = entry.map_err(db_err)?;
        out.push(k.value().to_vec());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table up front so
    /// read transactions never see a missing table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(WORK_ITEMS).map_err(db_err)?;
        wt.open_table(WORK_ITEM_KEYS).map_err(db_err)?;
        wt.open_table(CHILDREN).map_err(db_err)?;
        wt.open_table(PRDS).map_err(db_err)?;
        wt.open_table(DELIVERABLES).map_err(db_err)?;
        wt.open_table(USER_STORIES).map_err(db_err)?;
        wt.open_table(SUB_AGENT_RESULTS).map_err(db_err)?;
        wt.open_table(RETROSPECTIVES).map_err(db_err)?;
        wt.open_table(HANDOFFS).map_err(db_err)?;
        wt.open_table(HANDOFF_INDEX).map_err(db_err)?;
        wt.open_table(PENDING_EDGES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn read<T>(
        &self,
        operation: &str,
        deadline: Deadline,
        f: impl FnOnce(&ReadTransaction) -> Result<T>,
    ) -> Result<T> {
        deadline.check(operation)?;
        let rt = self.db.begin_read().map_err(db_err)?;
        f(&rt)
    }

    /// Run `f` in one write transaction. The deadline is checked before the
    /// transaction starts and again before commit; a commit that has started
    /// is never reported as a timeout.
    fn write<T>(
        &self,
        operation: &str,
        deadline: Deadline,
        f: impl FnOnce(&WriteTransaction) -> Result<T>,
    ) -> Result<T> {
        deadline.check(operation)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let out = f(&wt)?;
        deadline.check(operation)?;
        wt.commit().map_err(db_err)?;
        Ok(out)
    }

    fn require_item(wt: &WriteTransaction, id: WorkItemId) -> Result<()> {
        let table = wt.open_table(WORK_ITEMS).map_err(db_err)?;
        if table.get(id.as_bytes().as_slice()).map_err(db_err)?.is_none() {
            return Err(PhasegateError::WorkItemNotFound(id.to_string()));
        }
        Ok(())
    }

    fn put_record<T: Serialize>(
        &self,
        operation: &str,
        table_def: TableDefinition<'static, &'static [u8], &'static [u8]>,
        owner: WorkItemId,
        id: Uuid,
        value: &T,
        deadline: Deadline,
    ) -> Result<()> {
        let bytes = encode(value)?;
        self.write(operation, deadline, |wt| {
            Self::require_item(wt, owner)?;
            let mut table = wt.open_table(table_def).map_err(db_err)?;
            table
                .insert(record_key(owner, id).as_slice(), bytes.as_slice())
                .map_err(db_err)?;
            Ok(())
        })
    }
}

impl Store for RedbStore {
    fn insert_work_item(&self, item: &WorkItem, deadline: Deadline) -> Result<()> {
        let bytes = encode(item)?;
        self.write("insert_work_item", deadline, |wt| {
            let mut keys = wt.open_table(WORK_ITEM_KEYS).map_err(db_err)?;
            if keys.get(item.key.as_str()).map_err(db_err)?.is_some() {
                return Err(PhasegateError::WorkItemExists(item.key.clone()));
            }
            keys.insert(item.key.as_str(), item.id.as_bytes().as_slice())
                .map_err(db_err)?;

            let mut items = wt.open_table(WORK_ITEMS).map_err(db_err)?;
            items
                .insert(item.id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(db_err)?;

            if let Some(parent) = item.parent_id {
                let mut children = wt.open_table(CHILDREN).map_err(db_err)?;
                children
                    .insert(record_key(parent, item.id).as_slice(), EMPTY)
                    .map_err(db_err)?;
            }
            Ok(())
        })
    }

    fn get_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItem> {
        self.read("get_work_item", deadline, |rt| {
            let table = rt.open_table(WORK_ITEMS).map_err(db_err)?;
            get_json(&table, id.as_bytes())?
                .ok_or_else(|| PhasegateError::WorkItemNotFound(id.to_string()))
        })
    }

    fn find_work_item_by_key(&self, key: &str, deadline: Deadline) -> Result<Option<WorkItem>> {
        self.read("find_work_item_by_key", deadline, |rt| {
            let keys = rt.open_table(WORK_ITEM_KEYS).map_err(db_err)?;
            let id = match keys.get(key).map_err(db_err)? {
                Some(guard) => uuid_from(guard.value())?,
                None => return Ok(None),
            };
            let items = rt.open_table(WORK_ITEMS).map_err(db_err)?;
            get_json(&items, id.as_bytes())
        })
    }

    fn list_work_items(&self, deadline: Deadline) -> Result<Vec<WorkItem>> {
        self.read("list_work_items", deadline, |rt| {
            let table = rt.open_table(WORK_ITEMS).map_err(db_err)?;
            let mut items = Vec::new();
            for entry in table.iter().map_err(db_err)? {
                let (_, v) = entry.map_err(db_err)?;
                items.push(decode::<WorkItem>(v.value())?);
            }
            sort_work_items(&mut items);
            Ok(items)
        })
    }

    fn list_children(&self, parent_id: WorkItemId, deadline: Deadline) -> Result<Vec<WorkItem>> {
        self.read("list_children", deadline, |rt| {
            let children = rt.open_table(CHILDREN).map_err(db_err)?;
            let items = rt.open_table(WORK_ITEMS).map_err(db_err)?;
            let mut out = Vec::new();
            for key in owner_keys(&children, parent_id)? {
                let child_id = uuid_from(&key[16..])?;
                if let Some(child) = get_json::<WorkItem, _>(&items, child_id.as_bytes())? {
                    out.push(child);
                }
            }
            sort_work_items(&mut out);
            Ok(out)
        })
    }

    fn delete_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<()> {
        self.write("delete_work_item", deadline, |wt| {
            let mut items = wt.open_table(WORK_ITEMS).map_err(db_err)?;
            let item: WorkItem = match items.remove(id.as_bytes().as_slice()).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(PhasegateError::WorkItemNotFound(id.to_string())),
            };

            let mut keys = wt.open_table(WORK_ITEM_KEYS).map_err(db_err)?;
            keys.remove(item.key.as_str()).map_err(db_err)?;

            let mut children = wt.open_table(CHILDREN).map_err(db_err)?;
            if let Some(parent) = item.parent_id {
                children
                    .remove(record_key(parent, id).as_slice())
                    .map_err(db_err)?;
            }

            let mut prds = wt.open_table(PRDS).map_err(db_err)?;
            prds.remove(id.as_bytes().as_slice()).map_err(db_err)?;

            for def in [DELIVERABLES, USER_STORIES] {
                let mut table = wt.open_table(def).map_err(db_err)?;
                for key in owner_keys(&table, id)? {
                    table.remove(key.as_slice()).map_err(db_err)?;
                }
            }
            Ok(())
        })
    }

    fn snapshot(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItemSnapshot> {
        self.read("snapshot", deadline, |rt| {
            let items = rt.open_table(WORK_ITEMS).map_err(db_err)?;
            let item: WorkItem = get_json(&items, id.as_bytes())?
                .ok_or_else(|| PhasegateError::WorkItemNotFound(id.to_string()))?;

            let prds = rt.open_table(PRDS).map_err(db_err)?;
            let prd = get_json(&prds, id.as_bytes())?;

            let deliverables =
                scan_owner(&rt.open_table(DELIVERABLES).map_err(db_err)?, id)?;
            let user_stories =
                scan_owner(&rt.open_table(USER_STORIES).map_err(db_err)?, id)?;
            let handoffs = scan_owner(&rt.open_table(HANDOFFS).map_err(db_err)?, id)?;
            let sub_agent_results =
                scan_owner(&rt.open_table(SUB_AGENT_RESULTS).map_err(db_err)?, id)?;
            let retrospective_count =
                owner_keys(&rt.open_table(RETROSPECTIVES).map_err(db_err)?, id)?.len();

            let child_table = rt.open_table(CHILDREN).map_err(db_err)?;
            let mut children = Vec::new();
            for key in owner_keys(&child_table, id)? {
                let child_id = uuid_from(&key[16..])?;
                if let Some(child) = get_json::<WorkItem, _>(&items, child_id.as_bytes())? {
                    children.push(ChildSummary {
                        id: child.id,
                        key: child.key,
                        status: child.status,
                    });
                }
            }

            Ok(normalize(WorkItemSnapshot {
                item,
                prd,
                deliverables,
                user_stories,
                handoffs,
                sub_agent_results,
                retrospective_count,
                children,
            }))
        })
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
        self.write("update_work_item", deadline, |wt| {
            let mut items = wt.open_table(WORK_ITEMS).map_err(db_err)?;
            let mut item: WorkItem = get_json(&items, id.as_bytes())?
                .ok_or_else(|| PhasegateError::WorkItemNotFound(id.to_string()))?;
            apply_update(&mut item, expected, mutate)?;
            let bytes = encode(&item)?;
            items
                .insert(id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(db_err)?;
            Ok(item)
        })
    }

    fn put_prd(&self, prd: &Prd, deadline: Deadline) -> Result<()> {
        let bytes = encode(prd)?;
        self.write("put_prd", deadline, |wt| {
            Self::require_item(wt, prd.work_item_id)?;
            let mut table = wt.open_table(PRDS).map_err(db_err)?;
            table
                .insert(prd.work_item_id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(db_err)?;
            Ok(())
        })
    }

    fn upsert_deliverable(&self, deliverable: &Deliverable, deadline: Deadline) -> Result<()> {
        self.put_record(
            "upsert_deliverable",
            DELIVERABLES,
            deliverable.work_item_id,
            deliverable.id,
            deliverable,
            deadline,
        )
    }

    fn upsert_user_story(&self, story: &UserStory, deadline: Deadline) -> Result<()> {
        self.put_record(
            "upsert_user_story",
            USER_STORIES,
            story.work_item_id,
            story.id,
            story,
            deadline,
        )
    }

    fn append_sub_agent_result(&self, result: &SubAgentResult, deadline: Deadline) -> Result<()> {
        self.put_record(
            "append_sub_agent_result",
            SUB_AGENT_RESULTS,
            result.work_item_id,
            result.id,
            result,
            deadline,
        )
    }

    fn append_retrospective(&self, retro: &Retrospective, deadline: Deadline) -> Result<()> {
        self.put_record(
            "append_retrospective",
            RETROSPECTIVES,
            retro.work_item_id,
            retro.id,
            retro,
            deadline,
        )
    }

    fn insert_pending_handoff(&self, handoff: &Handoff, deadline: Deadline) -> Result<()> {
        let bytes = encode(handoff)?;
        self.write("insert_pending_handoff", deadline, |wt| {
            Self::require_item(wt, handoff.work_item_id)?;
            let edge = handoff.edge();
            let ek = edge_key(handoff.work_item_id, edge);

            let mut edges = wt.open_table(PENDING_EDGES).map_err(db_err)?;
            if let Some(guard) = edges.get(ek.as_slice()).map_err(db_err)? {
                let existing = uuid_from(guard.value())?;
                return Err(PhasegateError::Conflict(format!(
                    "{} handoff {existing} is already pending acceptance",
                    edge.handoff_type()
                )));
            }
            edges
                .insert(ek.as_slice(), handoff.id.as_bytes().as_slice())
                .map_err(db_err)?;

            let mut handoffs = wt.open_table(HANDOFFS).map_err(db_err)?;
            handoffs
                .insert(
                    record_key(handoff.work_item_id, handoff.id).as_slice(),
                    bytes.as_slice(),
                )
                .map_err(db_err)?;

            let mut index = wt.open_table(HANDOFF_INDEX).map_err(db_err)?;
            index
                .insert(
                    handoff.id.as_bytes().as_slice(),
                    handoff.work_item_id.as_bytes().as_slice(),
                )
                .map_err(db_err)?;
            Ok(())
        })
    }

    fn get_handoff(&self, id: HandoffId, deadline: Deadline) -> Result<Handoff> {
        self.read("get_handoff", deadline, |rt| {
            let index = rt.open_table(HANDOFF_INDEX).map_err(db_err)?;
            let owner = match index.get(id.as_bytes().as_slice()).map_err(db_err)? {
                Some(guard) => uuid_from(guard.value())?,
                None => return Err(PhasegateError::HandoffNotFound(id.to_string())),
            };
            let handoffs = rt.open_table(HANDOFFS).map_err(db_err)?;
            get_json(&handoffs, record_key(owner, id).as_slice())?
                .ok_or_else(|| PhasegateError::HandoffNotFound(id.to_string()))
        })
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
        self.write("update_handoff", deadline, |wt| {
            let index = wt.open_table(HANDOFF_INDEX).map_err(db_err)?;
            let owner = match index.get(id.as_bytes().as_slice()).map_err(db_err)? {
                Some(guard) => uuid_from(guard.value())?,
                None => return Err(PhasegateError::HandoffNotFound(id.to_string())),
            };
            let key = record_key(owner, id);

            let mut handoffs = wt.open_table(HANDOFFS).map_err(db_err)?;
            let mut handoff: Handoff = get_json(&handoffs, key.as_slice())?
                .ok_or_else(|| PhasegateError::HandoffNotFound(id.to_string()))?;
            let was_pending = handoff.is_pending();
            apply_handoff_update(&mut handoff, expected_status, mutate)?;

            let bytes = encode(&handoff)?;
            handoffs
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(db_err)?;

            if was_pending && !handoff.is_pending() {
                let mut edges = wt.open_table(PENDING_EDGES).map_err(db_err)?;
                edges
                    .remove(edge_key(owner, handoff.edge()).as_slice())
                    .map_err(db_err)?;
            }
            Ok(handoff)
        })
    }

    fn list_handoffs(&self, work_item_id: WorkItemId, deadline: Deadline) -> Result<Vec<Handoff>> {
        self.read("list_handoffs", deadline, |rt| {
            let table = rt.open_table(HANDOFFS).map_err(db_err)?;
            let mut out: Vec<Handoff> = scan_owner(&table, work_item_id)?;
            out.sort_by_key(|h| (h.created_at, h.id));
            Ok(out)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
