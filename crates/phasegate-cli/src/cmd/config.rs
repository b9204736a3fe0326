use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use clap::Subcommand;
use phasegate_core::config::{EngineConfig, WarnLevel};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(ctx: &Context, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    let config = EngineConfig::load(&ctx.root).context("failed to load config")?;
    match subcmd {
        ConfigSubcommand::Show => show(ctx, &config),
        ConfigSubcommand::Validate => validate(ctx, &config),
    }
}

fn show(ctx: &Context, config: &EngineConfig) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(config);
    }
    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    print!("{yaml}");
    Ok(())
}

fn validate(ctx: &Context, config: &EngineConfig) -> anyhow::Result<()> {
    let warnings = config.validate();

    if ctx.json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
