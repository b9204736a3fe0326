//! The five-phase pipeline every work item moves through.
//!
//! Phases are totally ordered and carry fixed weights that sum to 100. The
//! only legal forward move is to the immediate successor; demotion happens
//! exclusively through an explicit rollback.

use crate::error::{PhasegateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "LEAD_preapproval")]
    LeadPreapproval,
    #[serde(rename = "PLAN_prd")]
    PlanPrd,
    #[serde(rename = "EXEC_implementation")]
    ExecImplementation,
    #[serde(rename = "PLAN_verification")]
    PlanVerification,
    #[serde(rename = "LEAD_final_approval")]
    LeadFinalApproval,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::LeadPreapproval,
            Phase::PlanPrd,
            Phase::ExecImplementation,
            Phase::PlanVerification,
            Phase::LeadFinalApproval,
        ]
    }

    pub fn initial() -> Phase {
        Phase::LeadPreapproval
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Phase::all().get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Phase> {
        self.index().checked_sub(1).map(|i| Phase::all()[i])
    }

    /// Share of the 100-point progress score this phase contributes when complete.
    pub fn weight(self) -> u8 {
        match self {
            Phase::LeadPreapproval => 20,
            Phase::PlanPrd => 20,
            Phase::ExecImplementation => 30,
            Phase::PlanVerification => 15,
            Phase::LeadFinalApproval => 15,
        }
    }

    pub fn is_final(self) -> bool {
        self == Phase::LeadFinalApproval
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::LeadPreapproval => "LEAD_preapproval",
            Phase::PlanPrd => "PLAN_prd",
            Phase::ExecImplementation => "EXEC_implementation",
            Phase::PlanVerification => "PLAN_verification",
            Phase::LeadFinalApproval => "LEAD_final_approval",
        }
    }

    /// Role that owns the phase: LEAD, PLAN or EXEC.
    pub fn owner(self) -> &'static str {
        match self {
            Phase::LeadPreapproval | Phase::LeadFinalApproval => "LEAD",
            Phase::PlanPrd | Phase::PlanVerification => "PLAN",
            Phase::ExecImplementation => "EXEC",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = PhasegateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "lead_preapproval" => Ok(Phase::LeadPreapproval),
            "plan_prd" => Ok(Phase::PlanPrd),
            "exec_implementation" => Ok(Phase::ExecImplementation),
            "plan_verification" => Ok(Phase::PlanVerification),
            "lead_final_approval" => Ok(Phase::LeadFinalApproval),
            _ => Err(PhasegateError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// An adjacent `(from, to)` pair of phases; the unit a handoff is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: Phase,
    pub to: Phase,
}

impl Edge {
    pub fn new(from: Phase, to: Phase) -> Result<Self> {
        check_forward(from, to)?;
        Ok(Self { from, to })
    }

    pub fn all() -> Vec<Edge> {
        Phase::all()
            .windows(2)
            .map(|w| Edge {
                from: w[0],
                to: w[1],
            })
            .collect()
    }

    /// The edge into the final phase. Its acceptance gates completion.
    pub fn terminal() -> Edge {
        Edge {
            from: Phase::PlanVerification,
            to: Phase::LeadFinalApproval,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Edge::terminal()
    }

    /// Conventional handoff name, e.g. `EXEC-TO-PLAN`.
    pub fn handoff_type(self) -> String {
        format!("{}-TO-{}", self.from.owner(), self.to.owner())
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Forward transitions advance exactly one phase.
pub fn check_forward(from: Phase, to: Phase) -> Result<()> {
    if to <= from {
        return Err(PhasegateError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "transitions are forward-only; use rollback to demote".to_string(),
        });
    }
    if from.next() != Some(to) {
        return Err(PhasegateError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: format!(
                "phases cannot be skipped; next phase is {}",
                from.next().map(|p| p.as_str()).unwrap_or("none")
            ),
        });
    }
    Ok(())
}

/// Rollback demotes to any strictly earlier phase.
pub fn check_rollback(from: Phase, to: Phase) -> Result<()> {
    if to >= from {
        return Err(PhasegateError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "rollback target must be an earlier phase".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn weights_sum_to_one_hundred() {
        let total: u32 = Phase::all().iter().map(|p| p.weight() as u32).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn phase_ordering_and_next() {
        assert!(Phase::LeadPreapproval < Phase::PlanPrd);
        assert_eq!(Phase::PlanPrd.next(), Some(Phase::ExecImplementation));
        assert_eq!(Phase::LeadFinalApproval.next(), None);
        assert_eq!(Phase::LeadPreapproval.previous(), None);
        assert_eq!(
            Phase::LeadFinalApproval.previous(),
            Some(Phase::PlanVerification)
        );
    }

    #[test]
    fn parses_canonical_and_loose_names() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_str(phase.as_str()).unwrap(), *phase);
        }
        assert_eq!(
            Phase::from_str("exec-implementation").unwrap(),
            Phase::ExecImplementation
        );
        assert!(Phase::from_str("qa").is_err());
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&Phase::PlanVerification).unwrap();
        assert_eq!(json, "\"PLAN_verification\"");
    }

    #[test]
    fn forward_only_no_skipping() {
        assert!(check_forward(Phase::LeadPreapproval, Phase::PlanPrd).is_ok());
        assert!(check_forward(Phase::LeadPreapproval, Phase::ExecImplementation).is_err());
        assert!(check_forward(Phase::PlanPrd, Phase::LeadPreapproval).is_err());
        assert!(check_forward(Phase::PlanPrd, Phase::PlanPrd).is_err());
    }

    #[test]
    fn rollback_requires_earlier_target() {
        assert!(check_rollback(Phase::PlanVerification, Phase::PlanPrd).is_ok());
        assert!(check_rollback(Phase::PlanPrd, Phase::PlanPrd).is_err());
        assert!(check_rollback(Phase::PlanPrd, Phase::ExecImplementation).is_err());
    }

    #[test]
    fn edge_names() {
        let names: Vec<String> = Edge::all().iter().map(|e| e.handoff_type()).collect();
        assert_eq!(
            names,
            ["LEAD-TO-PLAN", "PLAN-TO-EXEC", "EXEC-TO-PLAN", "PLAN-TO-LEAD"]
        );
        assert!(Edge::all()[3].is_terminal());
    }
}
