use crate::error::PhasegateError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// WorkItemType
// ---------------------------------------------------------------------------

/// Registered work item types. Every variant has a profile in
/// [`crate::profile::resolve_profile`]; adding a variant without one is a
/// compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    Feature,
    Enhancement,
    Bugfix,
    Infrastructure,
    Database,
    Security,
    Documentation,
    Refactor,
    Orchestrator,
}

impl WorkItemType {
    pub fn all() -> &'static [WorkItemType] {
        &[
            WorkItemType::Feature,
            WorkItemType::Enhancement,
            WorkItemType::Bugfix,
            WorkItemType::Infrastructure,
            WorkItemType::Database,
            WorkItemType::Security,
            WorkItemType::Documentation,
            WorkItemType::Refactor,
            WorkItemType::Orchestrator,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkItemType::Feature => "feature",
            WorkItemType::Enhancement => "enhancement",
            WorkItemType::Bugfix => "bugfix",
            WorkItemType::Infrastructure => "infrastructure",
            WorkItemType::Database => "database",
            WorkItemType::Security => "security",
            WorkItemType::Documentation => "documentation",
            WorkItemType::Refactor => "refactor",
            WorkItemType::Orchestrator => "orchestrator",
        }
    }

    pub fn parse(s: &str) -> Option<WorkItemType> {
        let s = s.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemType {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            PhasegateError::Validation(format!("unknown work item type '{s}'"))
        })
    }
}

// ---------------------------------------------------------------------------
// ItemType
// ---------------------------------------------------------------------------

/// The type as stored on a work item.
///
/// Rows written outside the typed boundary may carry a type string that is not
/// registered; those load as `Unregistered` instead of failing to decode, and
/// resolve to the conservative profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemType {
    Registered(WorkItemType),
    Unregistered(String),
}

impl ItemType {
    pub fn registered(&self) -> Option<WorkItemType> {
        match self {
            ItemType::Registered(t) => Some(*t),
            ItemType::Unregistered(_) => None,
        }
    }

    pub fn is(&self, ty: WorkItemType) -> bool {
        self.registered() == Some(ty)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemType::Registered(t) => t.as_str(),
            ItemType::Unregistered(s) => s,
        }
    }
}

impl From<String> for ItemType {
    fn from(s: String) -> Self {
        match WorkItemType::parse(&s) {
            Some(t) => ItemType::Registered(t),
            None => ItemType::Unregistered(s),
        }
    }
}

impl From<ItemType> for String {
    fn from(t: ItemType) -> Self {
        t.as_str().to_string()
    }
}

impl From<WorkItemType> for ItemType {
    fn from(t: WorkItemType) -> Self {
        ItemType::Registered(t)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkItemStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Draft,
    Active,
    Completed,
    Archived,
    Cancelled,
}

impl WorkItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkItemStatus::Draft => "draft",
            WorkItemStatus::Active => "active",
            WorkItemStatus::Completed => "completed",
            WorkItemStatus::Archived => "archived",
            WorkItemStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are mutually exclusive with a live session lease.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkItemStatus::Completed | WorkItemStatus::Archived | WorkItemStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkItemStatus::Draft),
            "active" => Ok(WorkItemStatus::Active),
            "completed" => Ok(WorkItemStatus::Completed),
            "archived" => Ok(WorkItemStatus::Archived),
            "cancelled" => Ok(WorkItemStatus::Cancelled),
            _ => Err(PhasegateError::Validation(format!("unknown status '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Deliverables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverablePriority {
    Required,
    High,
    Medium,
    Low,
}

impl DeliverablePriority {
    /// Required and high-priority deliverables gate EXEC_implementation.
    pub fn is_gating(self) -> bool {
        matches!(self, DeliverablePriority::Required | DeliverablePriority::High)
    }
}

impl fmt::Display for DeliverablePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliverablePriority::Required => "required",
            DeliverablePriority::High => "high",
            DeliverablePriority::Medium => "medium",
            DeliverablePriority::Low => "low",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeliverablePriority {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(DeliverablePriority::Required),
            "high" => Ok(DeliverablePriority::High),
            "medium" => Ok(DeliverablePriority::Medium),
            "low" => Ok(DeliverablePriority::Low),
            _ => Err(PhasegateError::Validation(format!(
                "unknown deliverable priority '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl fmt::Display for DeliverableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliverableStatus::NotStarted => "not_started",
            DeliverableStatus::InProgress => "in_progress",
            DeliverableStatus::Completed => "completed",
            DeliverableStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeliverableStatus {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" | "pending" => Ok(DeliverableStatus::NotStarted),
            "in_progress" => Ok(DeliverableStatus::InProgress),
            "completed" => Ok(DeliverableStatus::Completed),
            "blocked" => Ok(DeliverableStatus::Blocked),
            _ => Err(PhasegateError::Validation(format!(
                "unknown deliverable status '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// User stories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    Ready,
    InProgress,
    Completed,
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Ready => "ready",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Failed,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ValidationStatus::Pending),
            "validated" => Ok(ValidationStatus::Validated),
            "failed" => Ok(ValidationStatus::Failed),
            _ => Err(PhasegateError::Validation(format!(
                "unknown validation status '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// HandoffStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    PendingAcceptance,
    Accepted,
    Rejected,
    /// An accepted handoff withdrawn by a rollback.
    Revoked,
}

impl HandoffStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffStatus::PendingAcceptance => "pending_acceptance",
            HandoffStatus::Accepted => "accepted",
            HandoffStatus::Rejected => "rejected",
            HandoffStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sub-agent review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Conditional,
}

impl Verdict {
    pub fn is_failing(self) -> bool {
        self == Verdict::Fail
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Conditional => "CONDITIONAL",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Verdict {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "FAIL" => Ok(Verdict::Fail),
            "CONDITIONAL" | "CONDITIONAL_PASS" => Ok(Verdict::Conditional),
            _ => Err(PhasegateError::Validation(format!("unknown verdict '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCategory {
    Database,
    Security,
    Testing,
    Design,
    Performance,
    Documentation,
    Github,
}

impl ReviewCategory {
    pub fn all() -> &'static [ReviewCategory] {
        &[
            ReviewCategory::Database,
            ReviewCategory::Security,
            ReviewCategory::Testing,
            ReviewCategory::Design,
            ReviewCategory::Performance,
            ReviewCategory::Documentation,
            ReviewCategory::Github,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewCategory::Database => "database",
            ReviewCategory::Security => "security",
            ReviewCategory::Testing => "testing",
            ReviewCategory::Design => "design",
            ReviewCategory::Performance => "performance",
            ReviewCategory::Documentation => "documentation",
            ReviewCategory::Github => "github",
        }
    }
}

impl fmt::Display for ReviewCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewCategory {
    type Err = PhasegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| PhasegateError::Validation(format!("unknown review category '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn item_type_accepts_unregistered_strings() {
        let t: ItemType = serde_json::from_str("\"quantum\"").unwrap();
        assert_eq!(t, ItemType::Unregistered("quantum".to_string()));
        let t: ItemType = serde_json::from_str("\"infrastructure\"").unwrap();
        assert!(t.is(WorkItemType::Infrastructure));
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"infrastructure\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkItemStatus::Completed.is_terminal());
        assert!(WorkItemStatus::Archived.is_terminal());
        assert!(WorkItemStatus::Cancelled.is_terminal());
        assert!(!WorkItemStatus::Active.is_terminal());
        assert!(!WorkItemStatus::Draft.is_terminal());
    }

    #[test]
    fn gating_priorities() {
        assert!(DeliverablePriority::Required.is_gating());
        assert!(DeliverablePriority::High.is_gating());
        assert!(!DeliverablePriority::Medium.is_gating());
        assert!(!DeliverablePriority::Low.is_gating());
    }

    #[test]
    fn verdict_wire_format() {
        assert_eq!(serde_json::to_string(&Verdict::Conditional).unwrap(), "\"CONDITIONAL\"");
        assert_eq!(Verdict::from_str("pass").unwrap(), Verdict::Pass);
        assert!(Verdict::Fail.is_failing());
        assert!(!Verdict::Conditional.is_failing());
    }

    #[test]
    fn handoff_status_wire_format() {
        let json = serde_json::to_string(&HandoffStatus::PendingAcceptance).unwrap();
        assert_eq!(json, "\"pending_acceptance\"");
    }
}
