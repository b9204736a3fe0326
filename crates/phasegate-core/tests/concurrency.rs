//! Racing callers against both store implementations.

use phasegate_core::config::EngineConfig;
use phasegate_core::handoff::{HandoffContent, HandoffPayload};
use phasegate_core::phase::Phase;
use phasegate_core::store::{Deadline, MemoryStore, RedbStore, Store};
use phasegate_core::types::{HandoffStatus, WorkItemType};
use phasegate_core::work_item::{NewWorkItem, WorkItem};
use phasegate_core::{Engine, ErrorKind};
use std::sync::Barrier;
use tempfile::TempDir;

const THREADS: usize = 8;

fn d() -> Deadline {
    Deadline::none()
}

fn payload() -> HandoffPayload {
    HandoffPayload {
        from_phase: Phase::LeadPreapproval,
        to_phase: Phase::PlanPrd,
        content: HandoffContent {
            executive_summary: "approved".into(),
            completeness_report: "complete".into(),
            deliverables_manifest: vec!["scope".into()],
            key_decisions: vec!["go".into()],
            known_issues: vec!["none".into()],
            resource_utilization: "minimal".into(),
            action_items: vec!["write PRD".into()],
        },
        created_by: None,
    }
}

fn seed<S: Store>(e: &Engine<S>) -> WorkItem {
    e.create_work_item(
        NewWorkItem {
            key: "SD-RACE-001".into(),
            title: "Race".into(),
            item_type: WorkItemType::Bugfix,
            parent_key: None,
        },
        d(),
    )
    .unwrap()
}

/// Run `op` on every thread at once and collect the results in thread order.
fn race<T: Send, F>(op: F) -> Vec<T>
where
    F: Fn(usize) -> T + Sync,
{
    let barrier = Barrier::new(THREADS);
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (barrier, op) = (&barrier, &op);
                s.spawn(move || {
                    barrier.wait();
                    op(i)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn duplicate_submissions_yield_one_pending<S: Store>(e: Engine<S>) {
    let item = seed(&e);
    let results = race(|_| e.submit_handoff(item.id, payload(), d()));

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::Conflict, "{err}");
        assert!(err.is_retryable());
    }
    let pending = e
        .list_handoffs(item.id, d())
        .unwrap()
        .into_iter()
        .filter(|h| h.status == HandoffStatus::PendingAcceptance)
        .count();
    assert_eq!(pending, 1);
}

fn concurrent_accepts_all_succeed<S: Store>(e: Engine<S>) {
    let item = seed(&e);
    let h = e.submit_handoff(item.id, payload(), d()).unwrap();
    let results = race(|_| e.accept_handoff(h.id, d()));
    assert!(results.iter().all(|r| r.is_ok()));
    let accepted_at: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().accepted_at)
        .collect();
    assert!(accepted_at.windows(2).all(|w| w[0] == w[1]));
}

fn one_session_wins_the_lease<S: Store>(e: Engine<S>) {
    let item = seed(&e);
    let results = race(|i| e.claim(item.id, &format!("session-{i}"), None, d()));

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::Conflict));

    let holder = e.work_item(item.id, d()).unwrap().lease.unwrap();
    assert_eq!(
        Some(&holder.session_id),
        winners[0].lease.as_ref().map(|l| &l.session_id)
    );
}

fn memory() -> Engine<MemoryStore> {
    Engine::new(MemoryStore::new(), EngineConfig::new("race"))
}

fn redb(dir: &TempDir) -> Engine<RedbStore> {
    let store = RedbStore::open(&dir.path().join("phasegate.db")).unwrap();
    Engine::new(store, EngineConfig::new("race"))
}

#[test]
fn memory_duplicate_submissions() {
    duplicate_submissions_yield_one_pending(memory());
}

#[test]
fn redb_duplicate_submissions() {
    let dir = TempDir::new().unwrap();
    duplicate_submissions_yield_one_pending(redb(&dir));
}

#[test]
fn memory_concurrent_accepts() {
    concurrent_accepts_all_succeed(memory());
}

#[test]
fn redb_concurrent_accepts() {
    let dir = TempDir::new().unwrap();
    concurrent_accepts_all_succeed(redb(&dir));
}

#[test]
fn memory_lease_race() {
    one_session_wins_the_lease(memory());
}

#[test]
fn redb_lease_race() {
    let dir = TempDir::new().unwrap();
    one_session_wins_the_lease(redb(&dir));
}
