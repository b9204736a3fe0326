use crate::error::{PhasegateError, Result};
use crate::paths;
use crate::profile::ValidationProfile;
use crate::types::WorkItemType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ProgressConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum sub-agent confidence for a review category to count in PLAN_verification.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: u8,
}

fn default_confidence_floor() -> u8 {
    85
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
        }
    }
}

// ---------------------------------------------------------------------------
// LeaseConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
}

fn default_ttl_minutes() -> u32 {
    120
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.ttl_minutes))
    }
}

// ---------------------------------------------------------------------------
// RollbackConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Default for `RollbackOptions::revoke_later_handoffs`.
    #[serde(default)]
    pub revoke_later_handoffs: bool,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// EngineConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub leases: LeaseConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Per-type replacements for the built-in validation profiles.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ValidationProfile>,
}

fn default_version() -> u32 {
    1
}

impl EngineConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            progress: ProgressConfig::default(),
            leases: LeaseConfig::default(),
            rollback: RollbackConfig::default(),
            store: StoreConfig::default(),
            profiles: BTreeMap::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PhasegateError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        let floor = self.progress.confidence_floor;
        if floor > 100 {
            push(
                WarnLevel::Error,
                format!("progress.confidence_floor is {floor}; must be between 0 and 100"),
            );
        } else if floor < 50 {
            push(
                WarnLevel::Warning,
                format!("progress.confidence_floor is {floor}; reviews this weak rarely mean much"),
            );
        }

        if self.leases.ttl_minutes == 0 {
            push(
                WarnLevel::Error,
                "leases.ttl_minutes is 0; every claim would expire immediately".to_string(),
            );
        }

        if self.store.timeout_ms == 0 {
            push(
                WarnLevel::Error,
                "store.timeout_ms is 0; every store call would time out".to_string(),
            );
        }

        for key in self.profiles.keys() {
            if WorkItemType::parse(key).is_none() {
                push(
                    WarnLevel::Warning,
                    format!("unknown work item type '{key}' in profiles; override is ignored"),
                );
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
