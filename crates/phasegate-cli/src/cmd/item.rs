use super::Context;
use crate::output::{print_json, print_table, yes_no};
use anyhow::Context as _;
use clap::Subcommand;
use phasegate_core::types::{WorkItemStatus, WorkItemType};
use phasegate_core::work_item::{NewWorkItem, WorkItem};

#[derive(Subcommand)]
pub enum ItemSubcommand {
    /// Create a work item in draft
    Create {
        /// Stable key, e.g. SD-AUTH-001
        key: String,
        #[arg(long)]
        title: String,
        /// feature, enhancement, bugfix, infrastructure, database, security,
        /// documentation, refactor or orchestrator
        #[arg(long = "type", value_name = "TYPE")]
        item_type: WorkItemType,
        /// Key of the parent orchestrator
        #[arg(long)]
        parent: Option<String>,
    },
    /// List work items
    List {
        /// Only items with this status
        #[arg(long)]
        status: Option<WorkItemStatus>,
    },
    /// Show one work item with its sub-records
    Show { key: String },
    /// Approve a draft work item (draft -> active)
    Activate { key: String },
    /// Cancel a work item
    Cancel { key: String },
    /// Archive a work item
    Archive { key: String },
}

pub fn run(ctx: &Context, subcmd: ItemSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ItemSubcommand::Create {
            key,
            title,
            item_type,
            parent,
        } => create(ctx, key, title, item_type, parent),
        ItemSubcommand::List { status } => list(ctx, status),
        ItemSubcommand::Show { key } => show(ctx, &key),
        ItemSubcommand::Activate { key } => activate(ctx, &key),
        ItemSubcommand::Cancel { key } => set_status(ctx, &key, WorkItemStatus::Cancelled),
        ItemSubcommand::Archive { key } => set_status(ctx, &key, WorkItemStatus::Archived),
    }
}

fn report(ctx: &Context, item: &WorkItem, verb: &str) -> anyhow::Result<()> {
    if ctx.json {
        print_json(item)?;
    } else {
        println!(
            "{verb} {} [{}] phase={} status={}",
            item.key, item.item_type, item.phase, item.status
        );
    }
    Ok(())
}

fn create(
    ctx: &Context,
    key: String,
    title: String,
    item_type: WorkItemType,
    parent_key: Option<String>,
) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let label = key.clone();
    let item = ws
        .engine
        .create_work_item(
            NewWorkItem {
                key,
                title,
                item_type,
                parent_key,
            },
            ws.deadline,
        )
        .with_context(|| format!("failed to create work item '{label}'"))?;
    report(ctx, &item, "Created")
}

fn list(ctx: &Context, status: Option<WorkItemStatus>) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let items: Vec<WorkItem> = ws
        .engine
        .list_work_items(ws.deadline)
        .context("failed to list work items")?
        .into_iter()
        .filter(|w| status.map_or(true, |s| w.status == s))
        .collect();

    if ctx.json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("No work items.");
        return Ok(());
    }
    let rows = items
        .iter()
        .map(|w| {
            vec![
                w.key.clone(),
                w.item_type.to_string(),
                w.phase.to_string(),
                w.status.to_string(),
                w.lease
                    .as_ref()
                    .map(|l| l.session_id.clone())
                    .unwrap_or_else(|| "-".to_string()),
                w.title.clone(),
            ]
        })
        .collect();
    print_table(&["KEY", "TYPE", "PHASE", "STATUS", "LEASE", "TITLE"], rows);
    Ok(())
}

fn show(ctx: &Context, key: &str) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let snap = ws
        .engine
        .snapshot(item.id, ws.deadline)
        .with_context(|| format!("failed to read '{key}'"))?;

    if ctx.json {
        return print_json(&snap);
    }

    let w = &snap.item;
    println!("{}: {}", w.key, w.title);
    println!("  type:          {}", w.item_type);
    println!("  phase:         {}", w.phase);
    println!("  status:        {}", w.status);
    println!("  auto-complete: {}", yes_no(w.auto_complete));
    if let Some(lease) = &w.lease {
        println!(
            "  lease:         {} (expires {})",
            lease.session_id, lease.expires_at
        );
    }
    if let Some(prd) = &snap.prd {
        println!("  prd:           {}", prd.title);
    }
    println!(
        "  objectives:    {} objectives, {} metrics, {} risks",
        w.objectives.objective_count(),
        w.objectives.metric_count(),
        w.objectives.risk_count()
    );

    if !snap.deliverables.is_empty() {
        println!("\nDeliverables:");
        for d in &snap.deliverables {
            println!(
                "  {:<24} {:<9} {}",
                d.name,
                d.priority.to_string(),
                d.completion_status
            );
        }
    }
    if !snap.user_stories.is_empty() {
        println!("\nUser stories:");
        for s in &snap.user_stories {
            let e2e = if s.has_e2e_evidence() { "e2e" } else { "-" };
            println!(
                "  {:<10} {:<10} {:<4} {}",
                s.story_key,
                s.validation_status.to_string(),
                e2e,
                s.title
            );
        }
    }
    if !snap.handoffs.is_empty() {
        println!("\nHandoffs:");
        for h in &snap.handoffs {
            println!("  {} {:<13} {}", h.id, h.handoff_type(), h.status);
        }
    }
    if !snap.children.is_empty() {
        println!("\nChildren:");
        for c in &snap.children {
            println!("  {:<24} {}", c.key, c.status);
        }
    }
    Ok(())
}

fn activate(ctx: &Context, key: &str) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let item = ws
        .engine
        .activate(item.id, ws.deadline)
        .with_context(|| format!("failed to activate '{key}'"))?;
    report(ctx, &item, "Activated")
}

fn set_status(ctx: &Context, key: &str, status: WorkItemStatus) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let item = ws
        .engine
        .set_status(item.id, status, ws.deadline)
        .with_context(|| format!("failed to set '{key}' to {status}"))?;
    report(ctx, &item, "Updated")
}
