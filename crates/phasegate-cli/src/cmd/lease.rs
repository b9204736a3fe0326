use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum LeaseSubcommand {
    /// Claim a work item for a session, or renew the session's claim
    Claim {
        key: String,
        #[arg(long, env = "PHASEGATE_SESSION")]
        session: String,
        /// Lease lifetime in minutes (default: leases.ttl_minutes)
        #[arg(long)]
        ttl_minutes: Option<u32>,
    },
    /// Release a session's claim
    Release {
        key: String,
        #[arg(long, env = "PHASEGATE_SESSION")]
        session: String,
    },
}

pub fn run(ctx: &Context, subcmd: LeaseSubcommand) -> anyhow::Result<()> {
    let ws = ctx.open()?;
    match subcmd {
        LeaseSubcommand::Claim {
            key,
            session,
            ttl_minutes,
        } => {
            let item = ws.item(&key)?;
            let ttl = ttl_minutes.map(|m| chrono::Duration::minutes(i64::from(m)));
            let updated = ws
                .engine
                .claim(item.id, &session, ttl, ws.deadline)
                .with_context(|| format!("failed to claim '{key}'"))?;
            if ctx.json {
                return print_json(&updated);
            }
            if let Some(lease) = &updated.lease {
                println!("{key}: claimed by {} until {}", lease.session_id, lease.expires_at);
            }
            Ok(())
        }
        LeaseSubcommand::Release { key, session } => {
            let item = ws.item(&key)?;
            let updated = ws
                .engine
                .release(item.id, &session, ws.deadline)
                .with_context(|| format!("failed to release '{key}'"))?;
            if ctx.json {
                return print_json(&updated);
            }
            println!("{key}: released");
            Ok(())
        }
    }
}
