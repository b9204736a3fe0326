use crate::error::{PhasegateError, Result};
use crate::paths;
use crate::phase::Phase;
use crate::types::{ItemType, WorkItemStatus, WorkItemType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkItemId = Uuid;

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// A session's time-bounded claim on a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub session_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Fails with `Validation` for a negative TTL or one that overflows the calendar.
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Result<Self> {
        if ttl < Duration::zero() {
            return Err(PhasegateError::Validation(format!(
                "lease ttl must not be negative, got {ttl}"
            )));
        }
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            PhasegateError::Validation(format!("lease ttl {ttl} is out of range"))
        })?;
        Ok(Self {
            session_id: session_id.into(),
            acquired_at: now,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// Objectives
// ---------------------------------------------------------------------------

/// LEAD pre-approval inputs. Only their presence is scored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objectives {
    #[serde(default)]
    pub strategic_objectives: Vec<String>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl Objectives {
    fn non_blank(items: &[String]) -> usize {
        items.iter().filter(|s| !s.trim().is_empty()).count()
    }

    pub fn objective_count(&self) -> usize {
        Self::non_blank(&self.strategic_objectives)
    }

    pub fn metric_count(&self) -> usize {
        Self::non_blank(&self.success_metrics)
    }

    pub fn risk_count(&self) -> usize {
        Self::non_blank(&self.risks)
    }
}

// ---------------------------------------------------------------------------
// PhaseTransition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: Phase,
    pub entered: DateTime<Utc>,
    pub exited: Option<DateTime<Utc>>,
    /// Set on entries created by a rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    /// Stable human-readable key, e.g. `SD-INFRA-001`.
    pub key: String,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub phase: Phase,
    pub status: WorkItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<WorkItemId>,
    #[serde(default)]
    pub objectives: Objectives,
    /// Automatic completion events fire only while this is set.
    #[serde(default = "default_auto_complete")]
    pub auto_complete: bool,
    /// Compare-and-swap token, bumped by the store on every update.
    #[serde(default)]
    pub revision: u64,
    pub phase_history: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_auto_complete() -> bool {
    true
}

/// Caller input for creating a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub key: String,
    pub title: String,
    pub item_type: WorkItemType,
    #[serde(default)]
    pub parent_key: Option<String>,
}

impl WorkItem {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        item_type: impl Into<ItemType>,
        parent_id: Option<WorkItemId>,
    ) -> Result<Self> {
        let key = key.into();
        paths::validate_key(&key)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            key,
            title: title.into(),
            item_type: item_type.into(),
            phase: Phase::initial(),
            status: WorkItemStatus::Draft,
            lease: None,
            parent_id,
            objectives: Objectives::default(),
            auto_complete: true,
            revision: 0,
            phase_history: vec![PhaseTransition {
                phase: Phase::initial(),
                entered: now,
                exited: None,
                rollback_reason: None,
            }],
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn claimed_by_session(&self) -> bool {
        self.lease.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn ensure_not_terminal(&self, action: &str) -> Result<()> {
        if self.is_terminal() {
            return Err(PhasegateError::Validation(format!(
                "cannot {action} work item '{}': status is {}",
                self.key, self.status
            )));
        }
        Ok(())
    }

    /// Move to `target`, closing the open history entry. Legality is checked by the caller.
    pub fn enter_phase(&mut self, target: Phase, rollback_reason: Option<String>) {
        let now = Utc::now();
        if let Some(last) = self.phase_history.last_mut() {
            last.exited = Some(now);
        }
        self.phase = target;
        self.updated_at = now;
        self.phase_history.push(PhaseTransition {
            phase: target,
            entered: now,
            exited: None,
            rollback_reason,
        });
    }

    /// Set a lifecycle status. Terminal statuses drop the lease in the same write;
    /// `completed_at` is kept when a completed item is later archived.
    pub fn set_status(&mut self, status: WorkItemStatus) {
        let now = Utc::now();
        self.status = status;
        if status.is_terminal() {
            self.lease = None;
        }
        if status == WorkItemStatus::Completed {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_work_item_starts_in_draft_at_first_phase() {
        let item = WorkItem::new("SD-AUTH-001", "Auth", WorkItemType::Feature, None).unwrap();
        assert_eq!(item.status, WorkItemStatus::Draft);
        assert_eq!(item.phase, Phase::LeadPreapproval);
        assert!(!item.claimed_by_session());
        assert!(item.auto_complete);
        assert_eq!(item.phase_history.len(), 1);
    }

    #[test]
    fn invalid_key_rejected() {
        assert!(WorkItem::new("bad key", "x", WorkItemType::Feature, None).is_err());
    }

    #[test]
    fn enter_phase_closes_previous_history_entry() {
        let mut item = WorkItem::new("SD-1", "One", WorkItemType::Bugfix, None).unwrap();
        item.enter_phase(Phase::PlanPrd, None);
        assert_eq!(item.phase, Phase::PlanPrd);
        assert!(item.phase_history[0].exited.is_some());
        assert!(item.phase_history[1].exited.is_none());
    }

    #[test]
    fn terminal_status_clears_lease() {
        let mut item = WorkItem::new("SD-2", "Two", WorkItemType::Bugfix, None).unwrap();
        item.lease = Some(Lease::new("s1", Utc::now(), Duration::minutes(5)).unwrap());
        item.set_status(WorkItemStatus::Completed);
        assert!(item.lease.is_none());
        assert!(item.completed_at.is_some());
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease::new("s1", now, Duration::minutes(1)).unwrap();
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::minutes(1)));
    }

    #[test]
    fn lease_ttl_must_fit_the_calendar() {
        let now = Utc::now();
        let err = Lease::new("s1", now, Duration::weeks(52_000_000)).unwrap_err();
        assert!(matches!(err, PhasegateError::Validation(_)));
        assert!(Lease::new("s1", now, Duration::seconds(-5)).is_err());
        assert!(Lease::new("s1", now, Duration::zero()).unwrap().is_expired(now));
    }

    #[test]
    fn objectives_ignore_blank_entries() {
        let o = Objectives {
            strategic_objectives: vec!["  ".into(), "Ship".into()],
            success_metrics: vec![],
            risks: vec!["".into()],
        };
        assert_eq!(o.objective_count(), 1);
        assert_eq!(o.metric_count(), 0);
        assert_eq!(o.risk_count(), 0);
    }

    #[test]
    fn unregistered_type_round_trips_through_yaml() {
        let mut item = WorkItem::new("SD-3", "Three", WorkItemType::Feature, None).unwrap();
        item.item_type = ItemType::Unregistered("legacy_kind".into());
        let yaml = serde_yaml::to_string(&item).unwrap();
        assert!(yaml.contains("type: legacy_kind"));
        let parsed: WorkItem = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.item_type, item.item_type);
    }
}
