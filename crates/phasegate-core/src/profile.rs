//! Type-aware validation profiles.
//!
//! A profile says which artifact categories a work item of a given type must
//! produce before a phase counts as complete. Resolution is a pure lookup;
//! every other component asks the resolver instead of matching on types.

use crate::types::{ItemType, ReviewCategory, WorkItemType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

// ---------------------------------------------------------------------------
// ValidationProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationProfile {
    pub requires_prd: bool,
    pub requires_user_stories: bool,
    /// Each user story needs end-to-end evidence before it counts as validated.
    pub requires_e2e_evidence: bool,
    /// Adds the `design` review category to the applicable set.
    pub requires_design_review: bool,
    /// Zero tracked required/high deliverables fails EXEC instead of passing vacuously.
    #[serde(default)]
    pub requires_deliverables: bool,
    #[serde(default = "default_true")]
    pub requires_retrospective: bool,
    /// Every child work item must be completed before EXEC counts as done.
    #[serde(default)]
    pub requires_children_complete: bool,
    #[serde(default)]
    pub review_categories: Vec<ReviewCategory>,
}

fn default_true() -> bool {
    true
}

impl ValidationProfile {
    /// Everything mandated except children, which only an orchestrator has.
    /// Used for types the resolver does not know.
    pub fn conservative() -> Self {
        Self {
            requires_prd: true,
            requires_user_stories: true,
            requires_e2e_evidence: true,
            requires_design_review: true,
            requires_deliverables: true,
            requires_retrospective: true,
            requires_children_complete: false,
            review_categories: ReviewCategory::all().to_vec(),
        }
    }

    /// Review categories that need a passing sub-agent verdict, sorted and deduplicated.
    pub fn applicable_categories(&self) -> Vec<ReviewCategory> {
        let mut cats = self.review_categories.clone();
        if self.requires_design_review {
            cats.push(ReviewCategory::Design);
        }
        cats.sort();
        cats.dedup();
        cats
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Built-in profile for a registered type.
pub fn resolve_profile(ty: WorkItemType) -> ValidationProfile {
    use ReviewCategory as C;

    let (prd, stories, e2e, design, categories): (bool, bool, bool, bool, &[ReviewCategory]) =
        match ty {
            WorkItemType::Feature => (true, true, true, true, &[C::Testing]),
            WorkItemType::Enhancement => (true, true, true, false, &[C::Testing]),
            WorkItemType::Bugfix => (true, false, false, false, &[C::Testing]),
            WorkItemType::Infrastructure => (true, true, false, false, &[C::Github]),
            WorkItemType::Database => (true, true, false, false, &[C::Database, C::Security]),
            WorkItemType::Security => (true, true, false, false, &[C::Security, C::Testing]),
            WorkItemType::Documentation => (false, false, false, false, &[C::Documentation]),
            WorkItemType::Refactor => (true, false, false, false, &[C::Testing]),
            WorkItemType::Orchestrator => (true, false, false, false, &[]),
        };

    ValidationProfile {
        requires_prd: prd,
        requires_user_stories: stories,
        requires_e2e_evidence: e2e,
        requires_design_review: design,
        requires_deliverables: false,
        requires_retrospective: true,
        requires_children_complete: ty == WorkItemType::Orchestrator,
        review_categories: categories.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// ProfileRegistry
// ---------------------------------------------------------------------------

/// Built-in profiles plus per-type overrides from configuration.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    overrides: BTreeMap<WorkItemType, ValidationProfile>,
}

/// Outcome of resolving a stored [`ItemType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub profile: ValidationProfile,
    /// Set when the type was not registered and the conservative profile was used.
    pub fallback: bool,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config overrides keyed by type name. Unregistered keys are skipped;
    /// `EngineConfig::validate` reports them.
    pub fn from_overrides(raw: &BTreeMap<String, ValidationProfile>) -> Self {
        let overrides = raw
            .iter()
            .filter_map(|(k, v)| WorkItemType::parse(k).map(|t| (t, v.clone())))
            .collect();
        Self { overrides }
    }

    pub fn profile_for(&self, ty: WorkItemType) -> ValidationProfile {
        self.overrides
            .get(&ty)
            .cloned()
            .unwrap_or_else(|| resolve_profile(ty))
    }

    pub fn resolve(&self, item_type: &ItemType, work_item_key: &str) -> Resolution {
        match item_type {
            ItemType::Registered(ty) => Resolution {
                profile: self.profile_for(*ty),
                fallback: false,
            },
            ItemType::Unregistered(raw) => {
                warn!(
                    work_item = work_item_key,
                    work_item_type = raw.as_str(),
                    "unregistered work item type; falling back to conservative profile"
                );
                Resolution {
                    profile: ValidationProfile::conservative(),
                    fallback: true,
                }
            }
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
    fn infrastructure_does_not_require_e2e() {
        let p = resolve_profile(WorkItemType::Infrastructure);
        assert!(!p.requires_e2e_evidence);
        assert!(p.requires_user_stories);
    }

    #[test]
    fn feature_requires_e2e_and_design_review() {
        let p = resolve_profile(WorkItemType::Feature);
        assert!(p.requires_e2e_evidence);
        assert_eq!(
            p.applicable_categories(),
            vec![ReviewCategory::Testing, ReviewCategory::Design]
        );
    }

    #[test]
    fn only_orchestrator_requires_children() {
        for ty in WorkItemType::all() {
            let p = resolve_profile(*ty);
            assert_eq!(
                p.requires_children_complete,
                *ty == WorkItemType::Orchestrator,
                "{ty}"
            );
            assert!(!p.requires_deliverables, "{ty}");
        }
    }

    #[test]
    fn unknown_string_fails_closed() {
        let reg = ProfileRegistry::new();
        let r = reg.resolve(&ItemType::from("moonshot".to_string()), "SD-ODD-001");
        assert!(r.fallback);
        assert_eq!(r.profile, ValidationProfile::conservative());
        let p = r.profile;
        assert!(p.requires_e2e_evidence && p.requires_prd && p.requires_deliverables);
        assert!(!p.requires_children_complete);
    }

    #[test]
    fn known_string_resolves_case_insensitively() {
        let reg = ProfileRegistry::new();
        let r = reg.resolve(&ItemType::from("Infrastructure".to_string()), "SD-INF-001");
        assert!(!r.fallback);
        assert_eq!(r.profile, resolve_profile(WorkItemType::Infrastructure));
    }

    #[test]
    fn registry_reports_fallback() {
        let reg = ProfileRegistry::new();
        let r = reg.resolve(&ItemType::Unregistered("legacy".into()), "SD-OLD-001");
        assert!(r.fallback);
        let r = reg.resolve(&ItemType::Registered(WorkItemType::Bugfix), "SD-FIX-001");
        assert!(!r.fallback);
        assert!(!r.profile.requires_user_stories);
    }

    #[test]
    fn registry_applies_overrides_for_registered_keys_only() {
        let mut raw = BTreeMap::new();
        let mut custom = resolve_profile(WorkItemType::Bugfix);
        custom.requires_user_stories = true;
        raw.insert("bugfix".to_string(), custom.clone());
        raw.insert("not-a-type".to_string(), ValidationProfile::conservative());

        let reg = ProfileRegistry::from_overrides(&raw);
        assert_eq!(reg.profile_for(WorkItemType::Bugfix), custom);
        assert_eq!(
            reg.profile_for(WorkItemType::Feature),
            resolve_profile(WorkItemType::Feature)
        );
    }
}
