mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, handoff::HandoffSubcommand, item::ItemSubcommand,
    lease::LeaseSubcommand, record::DeliverableSubcommand, record::ObjectivesSubcommand,
    record::PrdSubcommand, record::RetroSubcommand, record::ReviewSubcommand,
    record::StorySubcommand, Context,
};
use phasegate_core::guard::ViolationKind;
use phasegate_core::phase::Phase;
use phasegate_core::PhasegateError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "phasegate",
    about = "Phase-gated work items: progress scoring, handoffs, and consistency repair",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .phasegate/ or .git/)
    #[arg(long, global = true, env = "PHASEGATE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Datastore deadline in milliseconds (default: store.timeout_ms from config)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize phasegate in the current project
    Init,

    /// Create, list and change the status of work items
    Item {
        #[command(subcommand)]
        subcommand: ItemSubcommand,
    },

    /// Record the PRD for a work item
    Prd {
        #[command(subcommand)]
        subcommand: PrdSubcommand,
    },

    /// Track deliverables
    Deliverable {
        #[command(subcommand)]
        subcommand: DeliverableSubcommand,
    },

    /// Track user stories and their validation
    Story {
        #[command(subcommand)]
        subcommand: StorySubcommand,
    },

    /// Record sub-agent review verdicts
    Review {
        #[command(subcommand)]
        subcommand: ReviewSubcommand,
    },

    /// Record retrospectives
    Retro {
        #[command(subcommand)]
        subcommand: RetroSubcommand,
    },

    /// Record LEAD objectives, success metrics and risks
    Objectives {
        #[command(subcommand)]
        subcommand: ObjectivesSubcommand,
    },

    /// Show the progress breakdown for a work item
    Progress { key: String },

    /// Submit, accept, reject and list handoffs
    Handoff {
        #[command(subcommand)]
        subcommand: HandoffSubcommand,
    },

    /// Advance a work item to the next phase
    Transition { key: String, phase: Phase },

    /// Demote a work item to an earlier phase
    Rollback {
        key: String,
        phase: Phase,
        /// Revoke accepted handoffs from the target phase onward
        #[arg(long, conflicts_with = "keep_handoffs")]
        revoke_later_handoffs: bool,
        /// Keep accepted handoffs even if config says to revoke them
        #[arg(long)]
        keep_handoffs: bool,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Mark a work item completed
    Complete { key: String },

    /// Claim or release a session lease
    Lease {
        #[command(subcommand)]
        subcommand: LeaseSubcommand,
    },

    /// Report consistency violations
    Sweep {
        /// Restrict to these violation kinds
        #[arg(long = "kind")]
        kinds: Vec<ViolationKind>,
        /// Restrict to these work item keys
        #[arg(long = "key")]
        keys: Vec<String>,
    },

    /// Repair one violation by id (e.g. stale_claim:SD-AUTH-001)
    Repair { violation_id: String },

    /// Inspect and validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        root: root::resolve_root(cli.root.as_deref()),
        json: cli.json,
        timeout_ms: cli.timeout_ms,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&ctx),
        Commands::Item { subcommand } => cmd::item::run(&ctx, subcommand),
        Commands::Prd { subcommand } => cmd::record::run_prd(&ctx, subcommand),
        Commands::Deliverable { subcommand } => cmd::record::run_deliverable(&ctx, subcommand),
        Commands::Story { subcommand } => cmd::record::run_story(&ctx, subcommand),
        Commands::Review { subcommand } => cmd::record::run_review(&ctx, subcommand),
        Commands::Retro { subcommand } => cmd::record::run_retro(&ctx, subcommand),
        Commands::Objectives { subcommand } => cmd::record::run_objectives(&ctx, subcommand),
        Commands::Progress { key } => cmd::progress::run(&ctx, &key),
        Commands::Handoff { subcommand } => cmd::handoff::run(&ctx, subcommand),
        Commands::Transition { key, phase } => cmd::phase::transition(&ctx, &key, phase),
        Commands::Rollback {
            key,
            phase,
            revoke_later_handoffs,
            keep_handoffs,
            reason,
        } => {
            let revoke = match (revoke_later_handoffs, keep_handoffs) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd::phase::rollback(&ctx, &key, phase, revoke, reason)
        }
        Commands::Complete { key } => cmd::phase::complete(&ctx, &key),
        Commands::Lease { subcommand } => cmd::lease::run(&ctx, subcommand),
        Commands::Sweep { kinds, keys } => cmd::guard::sweep(&ctx, keys, kinds),
        Commands::Repair { violation_id } => cmd::guard::repair(&ctx, &violation_id),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand),
    };

    if let Err(e) = result {
        if ctx.json {
            let (kind, retryable) = match e.downcast_ref::<PhasegateError>() {
                Some(pe) => (pe.kind().as_str(), pe.is_retryable()),
                None => ("internal", false),
            };
            let value = serde_json::json!({
                "error": format!("{e:#}"),
                "kind": kind,
                "retryable": retryable,
            });
            println!("{value}");
        } else {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
        }
        std::process::exit(1);
    }
}
