use super::Context;
use crate::output::{print_json, print_table};
use anyhow::Context as _;
use clap::Subcommand;
use phasegate_core::handoff::{Handoff, HandoffContent, HandoffPayload};
use phasegate_core::phase::Phase;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum HandoffSubcommand {
    /// Submit a handoff read from a YAML or JSON file
    Submit {
        key: String,
        /// File with the seven handoff fields
        #[arg(long)]
        file: PathBuf,
        /// Target phase (default: the phase after the current one)
        #[arg(long)]
        to: Option<Phase>,
    },
    /// Accept a pending handoff
    Accept { id: Uuid },
    /// Reject a pending handoff
    Reject {
        id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List handoffs for a work item
    List { key: String },
}

/// On-disk handoff file. Phases are optional and default from the work item.
#[derive(Debug, Deserialize)]
struct HandoffFile {
    #[serde(default)]
    from_phase: Option<Phase>,
    #[serde(default)]
    to_phase: Option<Phase>,
    #[serde(flatten)]
    content: HandoffContent,
    #[serde(default)]
    created_by: Option<String>,
}

fn read_handoff_file(path: &Path) -> anyhow::Result<HandoffFile> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    // YAML is a superset of JSON; one parser covers both.
    serde_yaml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn run(ctx: &Context, subcmd: HandoffSubcommand) -> anyhow::Result<()> {
    match subcmd {
        HandoffSubcommand::Submit { key, file, to } => submit(ctx, &key, &file, to),
        HandoffSubcommand::Accept { id } => accept(ctx, id),
        HandoffSubcommand::Reject { id, reason } => reject(ctx, id, reason),
        HandoffSubcommand::List { key } => list(ctx, &key),
    }
}

fn report(ctx: &Context, h: &Handoff, verb: &str) -> anyhow::Result<()> {
    if ctx.json {
        print_json(h)
    } else {
        println!(
            "{verb} {} handoff {} ({} -> {}): {}",
            h.handoff_type(),
            h.id,
            h.from_phase,
            h.to_phase,
            h.status
        );
        Ok(())
    }
}

fn submit(ctx: &Context, key: &str, file: &Path, to: Option<Phase>) -> anyhow::Result<()> {
    let parsed = read_handoff_file(file)?;
    let ws = ctx.open()?;
    let item = ws.item(key)?;

    let from_phase = parsed.from_phase.unwrap_or(item.phase);
    let to_phase = match to.or(parsed.to_phase).or_else(|| from_phase.next()) {
        Some(p) => p,
        None => anyhow::bail!("{from_phase} is the final phase; there is no next phase to hand off to"),
    };
    let payload = HandoffPayload {
        from_phase,
        to_phase,
        content: parsed.content,
        created_by: parsed.created_by,
    };
    let h = ws
        .engine
        .submit_handoff(item.id, payload, ws.deadline)
        .with_context(|| format!("failed to submit handoff for '{key}'"))?;
    report(ctx, &h, "Submitted")
}

fn accept(ctx: &Context, id: Uuid) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let h = ws
        .engine
        .accept_handoff(id, ws.deadline)
        .with_context(|| format!("failed to accept handoff {id}"))?;
    report(ctx, &h, "Accepted")
}

fn reject(ctx: &Context, id: Uuid, reason: Option<String>) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let h = ws
        .engine
        .reject_handoff(id, reason, ws.deadline)
        .with_context(|| format!("failed to reject handoff {id}"))?;
    report(ctx, &h, "Rejected")
}

fn list(ctx: &Context, key: &str) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    let item = ws.item(key)?;
    let handoffs = ws
        .engine
        .list_handoffs(item.id, ws.deadline)
        .with_context(|| format!("failed to list handoffs for '{key}'"))?;

    if ctx.json {
        return print_json(&handoffs);
    }
    if handoffs.is_empty() {
        println!("No handoffs for {key}.");
        return Ok(());
    }
    let rows = handoffs
        .iter()
        .map(|h| {
            vec![
                h.id.to_string(),
                h.handoff_type(),
                h.status.to_string(),
                h.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "TYPE", "STATUS", "CREATED"], rows);
    Ok(())
}
