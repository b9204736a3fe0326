//! Sub-record commands: PRD, deliverables, user stories, reviews,
//! retrospectives and objectives.

use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use clap::Subcommand;
use phasegate_core::types::{
    DeliverablePriority, DeliverableStatus, ReviewCategory, ValidationStatus, Verdict,
};
use phasegate_core::work_item::Objectives;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum PrdSubcommand {
    /// Record (or replace) the PRD
    Record {
        key: String,
        #[arg(long)]
        title: String,
    },
}

#[derive(Subcommand)]
pub enum DeliverableSubcommand {
    /// Track a new deliverable
    Add {
        key: String,
        name: String,
        /// Free-form kind, e.g. database, api, ui
        #[arg(long, default_value = "code")]
        kind: String,
        /// required, high, medium or low
        #[arg(long, default_value = "required")]
        priority: DeliverablePriority,
    },
    /// Update a deliverable's completion status
    Set {
        key: String,
        name: String,
        /// not_started, in_progress, completed or blocked
        status: DeliverableStatus,
    },
}

#[derive(Subcommand)]
pub enum StorySubcommand {
    /// Add a user story
    Add {
        key: String,
        story_key: String,
        #[arg(long)]
        title: String,
    },
    /// Set a user story's validation status
    Validate {
        key: String,
        story_key: String,
        /// pending, validated or failed
        #[arg(long, default_value = "validated")]
        status: ValidationStatus,
        /// Reference to end-to-end test evidence
        #[arg(long)]
        evidence: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ReviewSubcommand {
    /// Record a sub-agent verdict
    Record {
        key: String,
        /// database, security, testing, design, performance, documentation or github
        category: ReviewCategory,
        /// pass, fail or conditional
        verdict: Verdict,
        /// 0-100
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        confidence: u8,
    },
}

#[derive(Subcommand)]
pub enum RetroSubcommand {
    /// Record a retrospective
    Record {
        key: String,
        #[arg(long)]
        summary: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ObjectivesSubcommand {
    /// Replace the LEAD objectives, success metrics and risks
    Record {
        key: String,
        #[arg(long = "objective")]
        objectives: Vec<String>,
        #[arg(long = "metric")]
        metrics: Vec<String>,
        #[arg(long = "risk")]
        risks: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn done<T: Serialize>(ctx: &Context, value: &T, message: String) -> anyhow::Result<()> {
    if ctx.json {
        print_json(value)
    } else {
        println!("{message}");
        Ok(())
    }
}

pub fn run_prd(ctx: &Context, subcmd: PrdSubcommand) -> anyhow::Result<()> {
    let PrdSubcommand::Record { key, title } = subcmd;
    let ws = ctx.open()?;
    let item = ws.item(&key)?;
    let prd = ws
        .engine
        .record_prd(item.id, &title, ws.deadline)
        .with_context(|| format!("failed to record PRD for '{key}'"))?;
    done(ctx, &prd, format!("Recorded PRD for {key}: {title}"))
}

pub fn run_deliverable(ctx: &Context, subcmd: DeliverableSubcommand) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    match subcmd {
        DeliverableSubcommand::Add {
            key,
            name,
            kind,
            priority,
        } => {
            let item = ws.item(&key)?;
            let d = ws
                .engine
                .record_deliverable(item.id, &name, &kind, priority, ws.deadline)
                .with_context(|| format!("failed to add deliverable '{name}' to '{key}'"))?;
            done(ctx, &d, format!("Added {priority} deliverable '{name}' to {key}"))
        }
        DeliverableSubcommand::Set { key, name, status } => {
            let item = ws.item(&key)?;
            let d = ws
                .engine
                .set_deliverable_status(item.id, &name, status, ws.deadline)
                .with_context(|| format!("failed to update deliverable '{name}' on '{key}'"))?;
            done(ctx, &d, format!("Deliverable '{name}' on {key} is now {status}"))
        }
    }
}

pub fn run_story(ctx: &Context, subcmd: StorySubcommand) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    match subcmd {
        StorySubcommand::Add {
            key,
            story_key,
            title,
        } => {
            let item = ws.item(&key)?;
            let s = ws
                .engine
                .record_user_story(item.id, &story_key, &title, ws.deadline)
                .with_context(|| format!("failed to add story '{story_key}' to '{key}'"))?;
            done(ctx, &s, format!("Added story {story_key} to {key}"))
        }
        StorySubcommand::Validate {
            key,
            story_key,
            status,
            evidence,
        } => {
            let item = ws.item(&key)?;
            let s = ws
                .engine
                .set_story_validation(item.id, &story_key, status, evidence, ws.deadline)
                .with_context(|| format!("failed to validate story '{story_key}' on '{key}'"))?;
            done(ctx, &s, format!("Story {story_key} on {key} is {status}"))
        }
    }
}

pub fn run_review(ctx: &Context, subcmd: ReviewSubcommand) -> anyhow::Result<()> {
    let ReviewSubcommand::Record {
        key,
        category,
        verdict,
        confidence,
    } = subcmd;
    let ws = ctx.open()?;
    let item = ws.item(&key)?;
    let r = ws
        .engine
        .record_sub_agent_result(item.id, category, verdict, confidence, ws.deadline)
        .with_context(|| format!("failed to record {category} review for '{key}'"))?;
    done(
        ctx,
        &r,
        format!("Recorded {category} review for {key}: {verdict} ({confidence}%)"),
    )
}

pub fn run_retro(ctx: &Context, subcmd: RetroSubcommand) -> anyhow::Result<()> {
    let RetroSubcommand::Record { key, summary } = subcmd;
    let ws = ctx.open()?;
    let item = ws.item(&key)?;
    let r = ws
        .engine
        .record_retrospective(item.id, summary, ws.deadline)
        .with_context(|| format!("failed to record retrospective for '{key}'"))?;
    done(ctx, &r, format!("Recorded retrospective for {key}"))
}

pub fn run_objectives(ctx: &Context, subcmd: ObjectivesSubcommand) -> anyhow::Result<()> {
    let ObjectivesSubcommand::Record {
        key,
        objectives,
        metrics,
        risks,
    } = subcmd;
    let ws = ctx.open()?;
    let item = ws.item(&key)?;
    let updated = ws
        .engine
        .record_objectives(
            item.id,
            Objectives {
                strategic_objectives: objectives,
                success_metrics: metrics,
                risks,
            },
            ws.deadline,
        )
        .with_context(|| format!("failed to record objectives for '{key}'"))?;
    let o = &updated.objectives;
    done(
        ctx,
        o,
        format!(
            "Recorded {} objectives, {} metrics, {} risks for {key}",
            o.objective_count(),
            o.metric_count(),
            o.risk_count()
        ),
    )
}
