//! Engine Config - settings shared by every task of a tree
//!
//! Loaded from a TOML or JSON file, then overridden from the environment.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Config file name inside the config directory
pub const ENGINE_CONFIG_FILE: &str = "engine.toml";

/// Directory name under the platform config dir (`~/.config/tasktree/`)
pub const CONFIG_DIR_NAME: &str = "tasktree";

const ENV_DEFAULT_TASK_NAME: &str = "TASKTREE_DEFAULT_TASK_NAME";
const ENV_DEFAULT_CLEANUP_WEIGHT: &str = "TASKTREE_DEFAULT_CLEANUP_WEIGHT";
const ENV_TREE_INDENT: &str = "TASKTREE_TREE_INDENT";
const ENV_TRACE_EVENTS: &str = "TASKTREE_TRACE_EVENTS";

// ============================================================================
// EngineConfig
// ============================================================================

/// Settings consulted by tasks at construction and during their run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Name used when a work unit has none of its own
    pub default_task_name: String,

    /// Weight of a cleanup task registered without an explicit weight
    pub default_cleanup_weight: f64,

    /// Spaces per nesting level in the debug tree
    pub tree_indent: usize,

    /// Write every emitted task event as a trace record
    pub trace_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_task_name: "task".to_string(),
            default_cleanup_weight: 1.0,
            tree_indent: 2,
            trace_events: false,
        }
    }
}

static SHARED_DEFAULT: OnceLock<Arc<EngineConfig>> = OnceLock::new();

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide default instance, shared by tasks created without a config
    pub fn shared_default() -> Arc<EngineConfig> {
        SHARED_DEFAULT
            .get_or_init(|| Arc::new(EngineConfig::default()))
            .clone()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Global config file path (`<config dir>/tasktree/engine.toml`)
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(ENGINE_CONFIG_FILE))
    }

    /// Global file (if present) merged with environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::global_path() {
            Some(path) if path.exists() => Self::load_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") | None => toml::from_str(&content)?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "Unsupported config format '{}' for {}",
                    other,
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Environment only, on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `TASKTREE_*` variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var(ENV_DEFAULT_TASK_NAME) {
            self.default_task_name = name;
        }

        if let Ok(weight) = std::env::var(ENV_DEFAULT_CLEANUP_WEIGHT) {
            self.default_cleanup_weight = weight.parse().map_err(|_| {
                Error::Config(format!("{} must be a number, got '{}'", ENV_DEFAULT_CLEANUP_WEIGHT, weight))
            })?;
        }

        if let Ok(indent) = std::env::var(ENV_TREE_INDENT) {
            self.tree_indent = indent.parse().map_err(|_| {
                Error::Config(format!("{} must be an integer, got '{}'", ENV_TREE_INDENT, indent))
            })?;
        }

        if let Ok(flag) = std::env::var(ENV_TRACE_EVENTS) {
            self.trace_events = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        Ok(())
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.default_task_name.trim().is_empty() {
            return Err(Error::Config("defaultTaskName must not be empty".to_string()));
        }
        if !(self.default_cleanup_weight > 0.0) || !self.default_cleanup_weight.is_finite() {
            return Err(Error::Config(format!(
                "defaultCleanupWeight must be a positive number, got {}",
                self.default_cleanup_weight
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn with_default_task_name(mut self, name: impl Into<String>) -> Self {
        self.default_task_name = name.into();
        self
    }

    pub fn with_default_cleanup_weight(mut self, weight: f64) -> Self {
        self.default_cleanup_weight = weight;
        self
    }

    pub fn with_tree_indent(mut self, indent: usize) -> Self {
        self.tree_indent = indent;
        self
    }

    pub fn with_trace_events(mut self, enabled: bool) -> Self {
        self.trace_events = enabled;
        self
    }
}
