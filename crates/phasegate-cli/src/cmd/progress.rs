use super::Context;
use crate::output::{print_json, print_table, yes_no};
use anyhow::Context as _;
use phasegate_core::progress::CheckOutcome;

pub fn run(ctx: &Context, key: &str) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let progress = ws
        .engine
        .get_progress(item.id, ws.deadline)
        .with_context(|| format!("failed to compute progress for '{key}'"))?;

    if ctx.json {
        return print_json(&progress);
    }

    println!(
        "{}: {}% (phase {}, can complete: {})",
        progress.work_item_key,
        progress.total_percent,
        progress.current_phase,
        yes_no(progress.can_complete)
    );
    if progress.profile_fallback {
        println!("  note: unregistered type; conservative profile applied");
    }
    println!();

    let rows = progress
        .per_phase
        .iter()
        .map(|(phase, p)| {
            let open: Vec<String> = p
                .signals
                .iter()
                .filter(|c| !c.outcome.is_satisfied())
                .map(|c| match c.outcome {
                    CheckOutcome::Missing => format!("{} (missing)", c.name),
                    _ => format!("{} ({}/{})", c.name, c.satisfied, c.total),
                })
                .collect();
            vec![
                phase.to_string(),
                format!("{}/{}", p.earned, p.weight),
                yes_no(p.complete),
                if open.is_empty() {
                    "-".to_string()
                } else {
                    open.join(", ")
                },
            ]
        })
        .collect();
    print_table(&["PHASE", "EARNED", "COMPLETE", "OPEN"], rows);
    Ok(())
}
