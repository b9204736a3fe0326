//! Caller-facing operations over a [`Store`].
//!
//! The engine holds no mutable state of its own. Every operation reads what it
//! needs, decides, and commits through a compare-and-swap so that a
//! concurrent writer surfaces as `Conflict` instead of being overwritten.
//! Nothing here retries.

use crate::config::EngineConfig;
use crate::error::{PhasegateError, Result};
use crate::guard::{
    self, operator_reason, parse_violation_id, RepairOutcome, RepairResult, SweepFilter,
    Violation, ViolationKind,
};
use crate::handoff::{self, AcceptOutcome, Handoff, HandoffId, HandoffPayload};
use crate::phase::{check_forward, check_rollback, Edge, Phase};
use crate::profile::ProfileRegistry;
use crate::progress::{compute_progress, ProgressBreakdown};
use crate::records::{Deliverable, Prd, Retrospective, SubAgentResult, UserStory};
use crate::snapshot::WorkItemSnapshot;
use crate::store::{Deadline, Precondition, Store};
use crate::types::{
    DeliverablePriority, DeliverableStatus, HandoffStatus, ReviewCategory, ValidationStatus,
    Verdict, WorkItemStatus,
};
use crate::work_item::{Lease, NewWorkItem, Objectives, WorkItem, WorkItemId};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Caller options for [`Engine::rollback`].
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Revoke accepted handoffs whose `from_phase` is at or after the rollback
    /// target. `None` takes the configured default.
    pub revoke_later_handoffs: Option<bool>,
    pub reason: Option<String>,
}

pub struct Engine<S: Store> {
    store: S,
    config: EngineConfig,
    registry: ProfileRegistry,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        let registry = ProfileRegistry::from_overrides(&config.profiles);
        Self {
            store,
            config,
            registry,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A deadline bounded by the configured store timeout.
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.config.store.timeout())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItem> {
        self.store.get_work_item(id, deadline)
    }

    pub fn work_item_by_key(&self, key: &str, deadline: Deadline) -> Result<WorkItem> {
        self.store
            .find_work_item_by_key(key, deadline)?
            .ok_or_else(|| PhasegateError::WorkItemNotFound(key.to_string()))
    }

    pub fn list_work_items(&self, deadline: Deadline) -> Result<Vec<WorkItem>> {
        self.store.list_work_items(deadline)
    }

    pub fn snapshot(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItemSnapshot> {
        self.store.snapshot(id, deadline)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn create_work_item(&self, new: NewWorkItem, deadline: Deadline) -> Result<WorkItem> {
        let parent_id = match &new.parent_key {
            Some(parent_key) => Some(self.work_item_by_key(parent_key, deadline)?.id),
            None => None,
        };
        let item = WorkItem::new(new.key, new.title, new.item_type, parent_id)?;
        self.store.insert_work_item(&item, deadline)?;
        info!(work_item = %item.key, item_type = %item.item_type, "work item created");
        Ok(item)
    }

    /// LEAD approval: `draft -> active`.
    pub fn activate(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItem> {
        let item = self.store.get_work_item(id, deadline)?;
        if item.status != WorkItemStatus::Draft {
            return Err(PhasegateError::Validation(format!(
                "only draft work items can be activated; '{}' is {}",
                item.key, item.status
            )));
        }
        let updated = self.store.update_work_item(
            id,
            &Precondition::of(&item),
            |w| {
                w.set_status(WorkItemStatus::Active);
                Ok(())
            },
            deadline,
        )?;
        info!(work_item = %updated.key, "work item activated");
        Ok(updated)
    }

    /// Administrative terminal statuses. Completion goes through [`Engine::complete`].
    pub fn set_status(
        &self,
        id: WorkItemId,
        status: WorkItemStatus,
        deadline: Deadline,
    ) -> Result<WorkItem> {
        let item = self.store.get_work_item(id, deadline)?;
        match status {
            WorkItemStatus::Cancelled => item.ensure_not_terminal("cancel")?,
            WorkItemStatus::Archived => {
                if item.status == WorkItemStatus::Archived {
                    return Err(PhasegateError::Validation(format!(
                        "work item '{}' is already archived",
                        item.key
                    )));
                }
            }
            other => {
                return Err(PhasegateError::Validation(format!(
                    "status {other} cannot be set directly"
                )))
            }
        }
        let updated = self.store.update_work_item(
            id,
            &Precondition::of(&item),
            |w| {
                w.set_status(status);
                Ok(())
            },
            deadline,
        )?;
        info!(work_item = %updated.key, status = %status, "work item status changed");
        Ok(updated)
    }

    /// Remove a work item with its PRD, deliverables and user stories.
    /// Handoffs, sub-agent results and retrospectives stay as history.
    /// Refused while the item still has children.
    pub fn delete_work_item(&self, id: WorkItemId, deadline: Deadline) -> Result<()> {
        let item = self.store.get_work_item(id, deadline)?;
        let children = self.store.list_children(id, deadline)?;
        if !children.is_empty() {
            let keys: Vec<&str> = children.iter().map(|c| c.key.as_str()).collect();
            return Err(PhasegateError::Validation(format!(
                "work item '{}' still has children: {}",
                item.key,
                keys.join(", ")
            )));
        }
        self.store.delete_work_item(id, deadline)?;
        info!(work_item = %item.key, "work item deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sub-records
    // -----------------------------------------------------------------------

    fn live_item(&self, id: WorkItemId, action: &str, deadline: Deadline) -> Result<WorkItem> {
        let item = self.store.get_work_item(id, deadline)?;
        item.ensure_not_terminal(action)?;
        Ok(item)
    }

    pub fn record_objectives(
        &self,
        id: WorkItemId,
        objectives: Objectives,
        deadline: Deadline,
    ) -> Result<WorkItem> {
        let item = self.live_item(id, "record objectives for", deadline)?;
        self.store.update_work_item(
            id,
            &Precondition::of(&item),
            |w| {
                w.objectives = objectives;
                Ok(())
            },
            deadline,
        )
    }

    pub fn record_prd(&self, id: WorkItemId, title: &str, deadline: Deadline) -> Result<Prd> {
        self.live_item(id, "record a PRD for", deadline)?;
        if title.trim().is_empty() {
            return Err(PhasegateError::Validation("PRD title is empty".to_string()));
        }
        let prd = Prd::new(id, title);
        self.store.put_prd(&prd, deadline)?;
        Ok(prd)
    }

    pub fn record_deliverable(
        &self,
        id: WorkItemId,
        name: &str,
        kind: &str,
        priority: DeliverablePriority,
        deadline: Deadline,
    ) -> Result<Deliverable> {
        self.live_item(id, "add a deliverable to", deadline)?;
        let snap = self.store.snapshot(id, deadline)?;
        if snap.deliverables.iter().any(|d| d.name == name) {
            return Err(PhasegateError::Validation(format!(
                "deliverable '{name}' already exists on '{}'",
                snap.item.key
            )));
        }
        let deliverable = Deliverable::new(id, name, kind, priority);
        self.store.upsert_deliverable(&deliverable, deadline)?;
        Ok(deliverable)
    }

    pub fn set_deliverable_status(
        &self,
        id: WorkItemId,
        name: &str,
        status: DeliverableStatus,
        deadline: Deadline,
    ) -> Result<Deliverable> {
        self.live_item(id, "update a deliverable on", deadline)?;
        let snap = self.store.snapshot(id, deadline)?;
        let mut deliverable = snap
            .deliverables
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| PhasegateError::RecordNotFound(format!("deliverable '{name}'")))?;
        deliverable.set_status(status);
        self.store.upsert_deliverable(&deliverable, deadline)?;
        Ok(deliverable)
    }

    pub fn record_user_story(
        &self,
        id: WorkItemId,
        story_key: &str,
        title: &str,
        deadline: Deadline,
    ) -> Result<UserStory> {
        self.live_item(id, "add a user story to", deadline)?;
        if story_key.trim().is_empty() {
            return Err(PhasegateError::Validation("story key is empty".to_string()));
        }
        let snap = self.store.snapshot(id, deadline)?;
        if snap.user_stories.iter().any(|s| s.story_key == story_key) {
            return Err(PhasegateError::Validation(format!(
                "user story '{story_key}' already exists on '{}'",
                snap.item.key
            )));
        }
        let story = UserStory::new(id, story_key, title);
        self.store.upsert_user_story(&story, deadline)?;
        Ok(story)
    }

    pub fn set_story_validation(
        &self,
        id: WorkItemId,
        story_key: &str,
        validation: ValidationStatus,
        e2e_evidence: Option<String>,
        deadline: Deadline,
    ) -> Result<UserStory> {
        self.live_item(id, "validate a user story on", deadline)?;
        let snap = self.store.snapshot(id, deadline)?;
        let mut story = snap
            .user_stories
            .into_iter()
            .find(|s| s.story_key == story_key)
            .ok_or_else(|| PhasegateError::RecordNotFound(format!("user story '{story_key}'")))?;
        story.validation_status = validation;
        if e2e_evidence.is_some() {
            story.e2e_evidence = e2e_evidence;
        }
        self.store.upsert_user_story(&story, deadline)?;
        Ok(story)
    }

    pub fn record_sub_agent_result(
        &self,
        id: WorkItemId,
        category: ReviewCategory,
        verdict: Verdict,
        confidence: u8,
        deadline: Deadline,
    ) -> Result<SubAgentResult> {
        self.live_item(id, "record a review for", deadline)?;
        if confidence > 100 {
            return Err(PhasegateError::Validation(format!(
                "confidence {confidence} is outside 0..=100"
            )));
        }
        let result = SubAgentResult::new(id, category, verdict, confidence);
        self.store.append_sub_agent_result(&result, deadline)?;
        Ok(result)
    }

    pub fn record_retrospective(
        &self,
        id: WorkItemId,
        summary: Option<String>,
        deadline: Deadline,
    ) -> Result<Retrospective> {
        self.live_item(id, "record a retrospective for", deadline)?;
        let retro = Retrospective::new(id, summary);
        self.store.append_retrospective(&retro, deadline)?;
        Ok(retro)
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    fn score(&self, snap: &WorkItemSnapshot) -> ProgressBreakdown {
        let resolution = self.registry.resolve(&snap.item.item_type, &snap.item.key);
        compute_progress(snap, &resolution, self.config.progress.confidence_floor)
    }

    /// Read-only; safe to poll.
    pub fn get_progress(&self, id: WorkItemId, deadline: Deadline) -> Result<ProgressBreakdown> {
        let snap = self.store.snapshot(id, deadline)?;
        let progress = self.score(&snap);
        debug!(
            work_item = %progress.work_item_key,
            total = progress.total_percent,
            "progress computed"
        );
        Ok(progress)
    }

    // -----------------------------------------------------------------------
    // Handoffs
    // -----------------------------------------------------------------------

    pub fn submit_handoff(
        &self,
        id: WorkItemId,
        payload: HandoffPayload,
        deadline: Deadline,
    ) -> Result<Handoff> {
        let snap = self.store.snapshot(id, deadline)?;
        let edge = handoff::validate_submission(&snap.item, &payload, &snap.handoffs)?;
        let handoff = Handoff::pending(id, edge, payload);
        self.store.insert_pending_handoff(&handoff, deadline)?;
        info!(
            work_item = %snap.item.key,
            handoff = %handoff.id,
            handoff_type = %edge.handoff_type(),
            "handoff submitted"
        );
        Ok(handoff)
    }

    /// Idempotent: accepting an accepted handoff returns it unchanged after
    /// re-running its follow-up work, so a caller that saw a follow-up fail can
    /// simply accept again.
    pub fn accept_handoff(&self, handoff_id: HandoffId, deadline: Deadline) -> Result<Handoff> {
        let current = self.store.get_handoff(handoff_id, deadline)?;
        let accepted = match current.status {
            HandoffStatus::Accepted => current,
            HandoffStatus::Rejected | HandoffStatus::Revoked => {
                return Err(PhasegateError::AlreadyResolved {
                    id: handoff_id.to_string(),
                    status: current.status.to_string(),
                })
            }
            HandoffStatus::PendingAcceptance => match self.store.update_handoff(
                handoff_id,
                HandoffStatus::PendingAcceptance,
                |h| h.accept().map(|_: AcceptOutcome| ()),
                deadline,
            ) {
                Ok(h) => {
                    info!(
                        handoff = %h.id,
                        handoff_type = %h.handoff_type(),
                        "handoff accepted"
                    );
                    h
                }
                // Another caller resolved it first. Their accept is ours.
                Err(PhasegateError::Conflict(_)) => {
                    let now = self.store.get_handoff(handoff_id, deadline)?;
                    if !now.is_accepted() {
                        return Err(PhasegateError::AlreadyResolved {
                            id: handoff_id.to_string(),
                            status: now.status.to_string(),
                        });
                    }
                    now
                }
                Err(e) => return Err(e),
            },
        };
        self.after_accept(&accepted, deadline)?;
        Ok(accepted)
    }

    /// Work that follows an acceptance. Every step is safe to repeat.
    fn after_accept(&self, accepted: &Handoff, deadline: Deadline) -> Result<()> {
        let edge = accepted.edge();
        if edge.from == Phase::ExecImplementation && edge.to == Phase::PlanVerification {
            self.auto_complete_deliverables(accepted.work_item_id, deadline)?;
        }
        if edge.is_terminal() {
            self.try_auto_complete(accepted.work_item_id, deadline)?;
        }
        Ok(())
    }

    pub fn reject_handoff(
        &self,
        handoff_id: HandoffId,
        reason: Option<String>,
        deadline: Deadline,
    ) -> Result<Handoff> {
        let current = self.store.get_handoff(handoff_id, deadline)?;
        if !current.is_pending() {
            return Err(PhasegateError::AlreadyResolved {
                id: handoff_id.to_string(),
                status: current.status.to_string(),
            });
        }
        let rejected = self
            .store
            .update_handoff(
                handoff_id,
                HandoffStatus::PendingAcceptance,
                |h| h.reject(reason),
                deadline,
            )
            .map_err(|e| match e {
                PhasegateError::Conflict(_) => PhasegateError::AlreadyResolved {
                    id: handoff_id.to_string(),
                    status: "resolved concurrently".to_string(),
                },
                other => other,
            })?;
        info!(handoff = %rejected.id, handoff_type = %rejected.handoff_type(), "handoff rejected");
        Ok(rejected)
    }

    pub fn get_handoff(&self, handoff_id: HandoffId, deadline: Deadline) -> Result<Handoff> {
        self.store.get_handoff(handoff_id, deadline)
    }

    pub fn list_handoffs(&self, id: WorkItemId, deadline: Deadline) -> Result<Vec<Handoff>> {
        self.store.get_work_item(id, deadline)?;
        self.store.list_handoffs(id, deadline)
    }

    pub fn can_transition(&self, id: WorkItemId, to: Phase, deadline: Deadline) -> Result<bool> {
        let snap = self.store.snapshot(id, deadline)?;
        Ok(handoff::can_transition(&snap.item, to, &snap.handoffs))
    }

    /// Mark every open required/high deliverable completed. The EXEC-TO-PLAN
    /// acceptance is the proof the EXEC work was verified.
    fn auto_complete_deliverables(&self, id: WorkItemId, deadline: Deadline) -> Result<usize> {
        let snap = self.store.snapshot(id, deadline)?;
        if !snap.item.auto_complete || snap.item.status.is_terminal() {
            debug!(work_item = %snap.item.key, "auto-completion off; deliverables left as is");
            return Ok(0);
        }
        let mut count = 0;
        for mut d in snap.gating_deliverables().filter(|d| !d.is_completed()).cloned() {
            d.set_status(DeliverableStatus::Completed);
            self.store.upsert_deliverable(&d, deadline)?;
            count += 1;
        }
        if count > 0 {
            info!(work_item = %snap.item.key, count, "deliverables auto-completed");
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Transitions and completion
    // -----------------------------------------------------------------------

    /// Advance one phase. Requires an accepted handoff for exactly this edge
    /// and every mandated artifact of the phase being left.
    ///
    /// Entering the final phase attempts completion. If that attempt fails the
    /// phase change stays committed and `complete` can finish the job.
    pub fn request_transition(
        &self,
        id: WorkItemId,
        to: Phase,
        deadline: Deadline,
    ) -> Result<WorkItem> {
        let snap = self.store.snapshot(id, deadline)?;
        let item = &snap.item;
        check_forward(item.phase, to)?;
        if item.status != WorkItemStatus::Active {
            return Err(PhasegateError::Validation(format!(
                "work item '{}' must be active to change phase; status is {}",
                item.key, item.status
            )));
        }
        if !handoff::can_transition(item, to, &snap.handoffs) {
            let edge = Edge { from: item.phase, to };
            return Err(PhasegateError::Validation(format!(
                "no accepted {} handoff for {edge}",
                edge.handoff_type()
            )));
        }
        self.score(&snap).ensure_artifacts_present(item.phase)?;

        let updated = self.store.update_work_item(
            id,
            &Precondition::of(item),
            |w| {
                w.enter_phase(to, None);
                Ok(())
            },
            deadline,
        )?;
        info!(work_item = %updated.key, from = %item.phase, to = %to, "phase advanced");

        if to.is_final() {
            if let Some(completed) = self.try_auto_complete(id, deadline)? {
                return Ok(completed);
            }
        }
        Ok(updated)
    }

    /// Why `snap` cannot be completed, if anything blocks it.
    fn completion_blocker(snap: &WorkItemSnapshot, progress: &ProgressBreakdown) -> Option<String> {
        let item = &snap.item;
        if item.status != WorkItemStatus::Active {
            return Some(format!("status is {}", item.status));
        }
        if !item.phase.is_final() {
            return Some(format!(
                "current phase is {}; completion happens in {}",
                item.phase,
                Phase::LeadFinalApproval
            ));
        }
        if !progress.can_complete {
            return Some(format!("progress is {}%", progress.total_percent));
        }
        let terminal = Edge::terminal();
        let accepted = snap
            .handoffs
            .iter()
            .any(|h| h.edge() == terminal && h.is_accepted());
        if !accepted {
            return Some(format!(
                "{} handoff is not accepted",
                terminal.handoff_type()
            ));
        }
        None
    }

    fn mark_completed(&self, snap: &WorkItemSnapshot, deadline: Deadline) -> Result<WorkItem> {
        let completed = self.store.update_work_item(
            snap.item.id,
            &Precondition::of(&snap.item),
            |w| {
                w.set_status(WorkItemStatus::Completed);
                Ok(())
            },
            deadline,
        )?;
        info!(work_item = %completed.key, "work item completed");
        Ok(completed)
    }

    fn complete_parent(&self, completed: &WorkItem, deadline: Deadline) -> Result<()> {
        if let Some(parent) = completed.parent_id {
            self.try_auto_complete(parent, deadline)?;
        }
        Ok(())
    }

    pub fn complete(&self, id: WorkItemId, deadline: Deadline) -> Result<WorkItem> {
        let snap = self.store.snapshot(id, deadline)?;
        let progress = self.score(&snap);
        if let Some(reason) = Self::completion_blocker(&snap, &progress) {
            return Err(PhasegateError::Validation(format!(
                "work item '{}' cannot be completed: {reason}",
                snap.item.key
            )));
        }
        let completed = self.mark_completed(&snap, deadline)?;
        self.complete_parent(&completed, deadline)?;
        Ok(completed)
    }

    /// Complete `id` if its guard is enabled and nothing blocks it. An item
    /// that is not eligible is left as is. Store failures are returned to the
    /// caller; the operation that triggered the attempt has already committed.
    fn try_auto_complete(&self, id: WorkItemId, deadline: Deadline) -> Result<Option<WorkItem>> {
        let snap = self.store.snapshot(id, deadline)?;
        if !snap.item.auto_complete {
            debug!(work_item = %snap.item.key, "auto-completion disabled");
            return Ok(None);
        }
        let progress = self.score(&snap);
        if let Some(reason) = Self::completion_blocker(&snap, &progress) {
            debug!(work_item = %snap.item.key, reason = %reason, "not eligible for auto-completion");
            return Ok(None);
        }
        let completed = match self.mark_completed(&snap, deadline) {
            Ok(item) => item,
            // A concurrent attempt completing the item first is success.
            Err(e @ PhasegateError::Conflict(_)) => {
                let now = self.store.get_work_item(id, deadline)?;
                if now.status == WorkItemStatus::Completed {
                    return Ok(None);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.complete_parent(&completed, deadline)?;
        Ok(Some(completed))
    }

    /// Demote to an earlier phase with the auto-completion guard lowered for
    /// the duration. The guard is restored even when the demotion fails.
    pub fn rollback(
        &self,
        id: WorkItemId,
        to: Phase,
        options: RollbackOptions,
        deadline: Deadline,
    ) -> Result<WorkItem> {
        let item = self.store.get_work_item(id, deadline)?;
        check_rollback(item.phase, to)?;
        if matches!(
            item.status,
            WorkItemStatus::Archived | WorkItemStatus::Cancelled
        ) {
            return Err(PhasegateError::Validation(format!(
                "cannot roll back work item '{}': status is {}",
                item.key, item.status
            )));
        }
        let revoke = options
            .revoke_later_handoffs
            .unwrap_or(self.config.rollback.revoke_later_handoffs);
        let reason = options.reason.unwrap_or_else(|| "rollback".to_string());
        let guard_before = item.auto_complete;

        let lowered = self.store.update_work_item(
            id,
            &Precondition::of(&item),
            |w| {
                w.auto_complete = false;
                Ok(())
            },
            deadline,
        )?;

        let demoted = (|| -> Result<(WorkItem, usize)> {
            let demoted = self.store.update_work_item(
                id,
                &Precondition::revision(lowered.revision),
                |w| {
                    w.enter_phase(to, Some(reason));
                    if w.status == WorkItemStatus::Completed {
                        w.status = WorkItemStatus::Active;
                        w.completed_at = None;
                    }
                    Ok(())
                },
                deadline,
            )?;
            let mut revoked = 0;
            if revoke {
                for h in self.store.list_handoffs(id, deadline)? {
                    if h.is_accepted() && h.from_phase >= to {
                        self.store.update_handoff(
                            h.id,
                            HandoffStatus::Accepted,
                            |h| h.revoke(),
                            deadline,
                        )?;
                        revoked += 1;
                    }
                }
            }
            Ok((demoted, revoked))
        })();

        let restored = self.store.update_work_item(
            id,
            &Precondition::default(),
            |w| {
                w.auto_complete = guard_before;
                Ok(())
            },
            deadline,
        );

        match (demoted, restored) {
            (Ok((_, revoked)), Ok(item)) => {
                info!(
                    work_item = %item.key,
                    to = %to,
                    revoked_handoffs = revoked,
                    "work item rolled back"
                );
                Ok(item)
            }
            (Ok(_), Err(e)) => {
                error!(work_item = %id, error = %e, "auto-completion guard not restored after rollback");
                Err(e)
            }
            (Err(e), restored) => {
                if let Err(re) = restored {
                    error!(work_item = %id, error = %re, "auto-completion guard not restored after failed rollback");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Claim for `session_id`, renewing if the session already holds it.
    pub fn claim(
        &self,
        id: WorkItemId,
        session_id: &str,
        ttl: Option<chrono::Duration>,
        deadline: Deadline,
    ) -> Result<WorkItem> {
        if session_id.trim().is_empty() {
            return Err(PhasegateError::Validation("session id is empty".to_string()));
        }
        let item = self.live_item(id, "claim", deadline)?;
        let now = Utc::now();
        if let Some(lease) = &item.lease {
            if lease.session_id != session_id && !lease.is_expired(now) {
                return Err(PhasegateError::Conflict(format!(
                    "work item '{}' is claimed by session '{}' until {}",
                    item.key, lease.session_id, lease.expires_at
                )));
            }
        }
        let ttl = ttl.unwrap_or_else(|| self.config.leases.ttl());
        let lease = Lease::new(session_id, now, ttl)?;
        let updated = self.store.update_work_item(
            id,
            &Precondition::of(&item),
            |w| {
                w.lease = Some(lease);
                Ok(())
            },
            deadline,
        )?;
        info!(work_item = %updated.key, session = session_id, "lease acquired");
        Ok(updated)
    }

    pub fn release(&self, id: WorkItemId, session_id: &str, deadline: Deadline) -> Result<WorkItem> {
        let item = self.store.get_work_item(id, deadline)?;
        match &item.lease {
            None => return Ok(item),
            Some(lease) if lease.session_id != session_id => {
                return Err(PhasegateError::Conflict(format!(
                    "work item '{}' is claimed by session '{}', not '{session_id}'",
                    item.key, lease.session_id
                )))
            }
            Some(_) => {}
        }
        let updated = self.store.update_work_item(
            id,
            &Precondition::of(&item),
            |w| {
                w.lease = None;
                Ok(())
            },
            deadline,
        )?;
        info!(work_item = %updated.key, session = session_id, "lease released");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Consistency guard
    // -----------------------------------------------------------------------

    fn detect_for(
        &self,
        item: &WorkItem,
        known_ids: Option<&HashSet<WorkItemId>>,
        deadline: Deadline,
    ) -> Result<Vec<Violation>> {
        let snap = self.store.snapshot(item.id, deadline)?;
        let parent_exists = match (snap.item.parent_id, known_ids) {
            (None, _) => true,
            (Some(parent), Some(ids)) => ids.contains(&parent),
            (Some(parent), None) => match self.store.get_work_item(parent, deadline) {
                Ok(_) => true,
                Err(PhasegateError::WorkItemNotFound(_)) => false,
                Err(e) => return Err(e),
            },
        };
        let progress = self.score(&snap);
        Ok(guard::detect(&snap, &progress, parent_exists, Utc::now()))
    }

    /// Read-only sweep. Safe to run alongside normal traffic; each work item is
    /// read in its own snapshot.
    pub fn find_violations(
        &self,
        filter: &SweepFilter,
        deadline: Deadline,
    ) -> Result<Vec<Violation>> {
        let items = self.store.list_work_items(deadline)?;
        let ids: HashSet<WorkItemId> = items.iter().map(|w| w.id).collect();
        let mut out = Vec::new();
        for item in items.iter().filter(|w| filter.matches_key(&w.key)) {
            let found = match self.detect_for(item, Some(&ids), deadline) {
                Ok(v) => v,
                Err(PhasegateError::WorkItemNotFound(_)) => {
                    debug!(work_item = %item.key, "deleted during sweep");
                    continue;
                }
                Err(e) => return Err(e),
            };
            out.extend(found.into_iter().filter(|v| filter.matches_kind(v.kind)));
        }
        info!(
            scanned = items.len(),
            violations = out.len(),
            "consistency sweep finished"
        );
        Ok(out)
    }

    /// Re-detect `violation_id` and apply its minimal repair. Lease problems
    /// are cleared; every other kind is left for an operator.
    pub fn repair(&self, violation_id: &str, deadline: Deadline) -> Result<RepairResult> {
        let (kind, key) = parse_violation_id(violation_id)?;
        let item = self
            .store
            .find_work_item_by_key(key, deadline)?
            .ok_or_else(|| PhasegateError::ViolationNotFound(violation_id.to_string()))?;
        let still_holds = self
            .detect_for(&item, None, deadline)?
            .into_iter()
            .any(|v| v.id == violation_id);
        if !still_holds {
            return Err(PhasegateError::ViolationNotFound(violation_id.to_string()));
        }

        if let Some(reason) = operator_reason(kind) {
            warn!(violation = violation_id, "violation requires an operator");
            return Ok(RepairResult {
                violation_id: violation_id.to_string(),
                outcome: RepairOutcome::RequiresOperator {
                    reason: reason.to_string(),
                },
                work_item: item,
            });
        }

        debug_assert!(matches!(
            kind,
            ViolationKind::StaleClaim | ViolationKind::ExpiredLease
        ));
        let repaired = self.store.update_work_item(
            item.id,
            &Precondition::of(&item),
            |w| {
                w.lease = None;
                Ok(())
            },
            deadline,
        )?;
        info!(violation = violation_id, "violation repaired");
        Ok(RepairResult {
            violation_id: violation_id.to_string(),
            outcome: RepairOutcome::Repaired,
            work_item: repaired,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
