use super::Context;
use crate::output::{print_json, print_table};
use anyhow::Context as _;
use phasegate_core::guard::{RepairOutcome, SweepFilter, ViolationKind};

pub fn sweep(ctx: &Context, keys: Vec<String>, kinds: Vec<ViolationKind>) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let violations = ws
        .engine
        .find_violations(&SweepFilter { keys, kinds }, ws.deadline)
        .context("consistency sweep failed")?;

    if ctx.json {
        return print_json(&violations);
    }
    if violations.is_empty() {
        println!("No violations.");
        return Ok(());
    }
    let rows = violations
        .iter()
        .map(|v| {
            vec![
                v.id.clone(),
                if v.kind.is_auto_repairable() {
                    "auto"
                } else {
                    "operator"
                }
                .to_string(),
                v.detail.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "REPAIR", "DETAIL"], rows);
    Ok(())
}

pub fn repair(ctx: &Context, violation_id: &str) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let result = ws
        .engine
        .repair(violation_id, ws.deadline)
        .with_context(|| format!("failed to repair '{violation_id}'"))?;

    if ctx.json {
        return print_json(&result);
    }
    match &result.outcome {
        RepairOutcome::Repaired => println!("Repaired {violation_id}"),
        RepairOutcome::RequiresOperator { reason } => {
            println!("{violation_id} requires an operator: {reason}")
        }
    }
    Ok(())
}
