use crate::error::{PhasegateError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PHASEGATE_DIR: &str = ".phasegate";
pub const CONFIG_FILE: &str = ".phasegate/config.yaml";
pub const DB_FILE: &str = ".phasegate/phasegate.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn phasegate_dir(root: &Path) -> PathBuf {
    root.join(PHASEGATE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

pub const MAX_KEY_LEN: usize = 64;

static KEY_RE: OnceLock<Regex> = OnceLock::new();

fn key_re() -> &'static Regex {
    KEY_RE.get_or_init(|| {
        Regex::new(r"^[A-Z][A-Z0-9]*(-[A-Z0-9]+)*$").unwrap_or_else(|e| panic!("key regex: {e}"))
    })
}

/// Work item keys are uppercase segments joined by single hyphens, e.g. `SD-INFRA-001`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || !key_re().is_match(key) {
        return Err(PhasegateError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
