use super::Context;
use crate::output::print_json;
use anyhow::Context as _;
use phasegate_core::config::EngineConfig;
use phasegate_core::store::RedbStore;
use phasegate_core::{io, paths};

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let root = &ctx.root;
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let config_path = paths::config_path(root);
    let cfg = EngineConfig::new(&project_name);
    let yaml = serde_yaml::to_string(&cfg).context("failed to serialize config")?;
    let created_config = io::write_if_missing(&config_path, yaml.as_bytes())
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    let db_path = paths::db_path(root);
    let created_db = !db_path.exists();
    RedbStore::open(&db_path)
        .with_context(|| format!("failed to create datastore {}", db_path.display()))?;

    if ctx.json {
        print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "config_created": created_config,
            "datastore_created": created_db,
        }))?;
        return Ok(());
    }

    println!("Initializing phasegate in: {}", root.display());
    let mark = |created: bool| if created { "created:" } else { "exists: " };
    println!("  {} {}", mark(created_config), paths::CONFIG_FILE);
    println!("  {} {}", mark(created_db), paths::DB_FILE);
    Ok(())
}
