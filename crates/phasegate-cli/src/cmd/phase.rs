use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use phasegate_core::phase::Phase;
use phasegate_core::work_item::WorkItem;
use phasegate_core::RollbackOptions;

fn report(ctx: &Context, item: &WorkItem, message: String) -> anyhow::Result<()> {
    if ctx.json {
        print_json(item)
    } else {
        println!("{message}");
        Ok(())
    }
}

pub fn transition(ctx: &Context, key: &str, to: Phase) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let updated = ws
        .engine
        .request_transition(item.id, to, ws.deadline)
        .with_context(|| format!("failed to move '{key}' to {to}"))?;
    let mut message = format!("{key}: {} -> {}", item.phase, updated.phase);
    if updated.status != item.status {
        message.push_str(&format!(" ({})", updated.status));
    }
    report(ctx, &updated, message)
}

pub fn rollback(
    ctx: &Context,
    key: &str,
    to: Phase,
    revoke_later_handoffs: Option<bool>,
    reason: Option<String>,
) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let updated = ws
        .engine
        .rollback(
            item.id,
            to,
            RollbackOptions {
                revoke_later_handoffs,
                reason,
            },
            ws.deadline,
        )
        .with_context(|| format!("failed to roll back '{key}' to {to}"))?;
    report(
        ctx,
        &updated,
        format!(
            "{key}: rolled back {} -> {} (status {})",
            item.phase, updated.phase, updated.status
        ),
    )
}

pub fn complete(ctx: &Context, key: &str) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let updated = ws
        .engine
        .complete(item.id, ws.deadline)
        .with_context(|| format!("failed to complete '{key}'"))?;
    report(ctx, &updated, format!("{key}: completed"))
}
