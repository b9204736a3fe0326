pub mod config;
pub mod guard;
pub mod handoff;
pub mod init;
pub mod item;
pub mod lease;
pub mod phase;
pub mod progress;
pub mod record;

use anyhow::Context as _;
use phasegate_core::config::EngineConfig;
use phasegate_core::paths;
use phasegate_core::store::{Deadline, RedbStore};
use phasegate_core::work_item::WorkItem;
use phasegate_core::Engine;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide options every command receives.
pub struct Context {
    pub root: PathBuf,
    pub json: bool,
    pub timeout_ms: Option<u64>,
}

/// An engine over the project's datastore plus the deadline for this invocation.
pub struct Workspace {
    pub engine: Engine<RedbStore>,
    pub deadline: Deadline,
}

impl Context {
    pub fn open(&self) -> anyhow::Result<Workspace> {
        let config = EngineConfig::load(&self.root).context("failed to load config")?;
        let db = paths::db_path(&self.root);
        let store = RedbStore::open(&db)
            .with_context(|| format!("failed to open datastore {}", db.display()))?;
        let engine = Engine::new(store, config);
        let deadline = match self.timeout_ms {
            Some(ms) => Deadline::after(Duration::from_millis(ms)),
            None => engine.default_deadline(),
        };
        Ok(Workspace { engine, deadline })
    }
}

impl Workspace {
    pub fn item(&self, key: &str) -> anyhow::Result<WorkItem> {
        self.engine
            .work_item_by_key(key, self.deadline)
            .with_context(|| format!("failed to load work item '{key}'"))
    }
}
