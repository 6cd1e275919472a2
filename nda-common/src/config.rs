//! Bootstrap configuration and root folder resolution
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: paths, confirmation policy, lock wait, logging
//! 2. **Database runtime**: values in the warehouse `settings` table
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`NDA_CONFIG`)
//! 3. User config directory (`~/.config/nda/<module>.toml`)
//! 4. Compiled defaults (fallback, never fails)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "NDA_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "NDA_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the warehouse database and upstream schemas
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Warehouse database path (default: `<root>/nda.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Directory with one SQLite file per upstream schema (default: `<root>/upstream`)
    #[serde(default)]
    pub upstream_folder: Option<PathBuf>,

    /// Synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How large candidate batches are confirmed before commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmPolicyKind {
    /// Ask the operator on the terminal
    #[default]
    Prompt,
    /// Always proceed
    AutoApprove,
    /// Decline every batch that needs confirmation
    RejectIfOverThreshold,
}

/// Synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Batches larger than this require confirmation (gated variants only)
    #[serde(default)]
    pub confirm_threshold: usize,

    /// Confirmation policy
    #[serde(default)]
    pub confirm_policy: ConfirmPolicyKind,

    /// Maximum total time to retry a locked write
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirm_threshold: 0,
            confirm_policy: ConfirmPolicyKind::default(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration, falling back to defaults when no file is found
    ///
    /// A missing config file is not an error: a warning is logged and
    /// compiled defaults are used. A file that exists but does not parse is.
    pub fn load_or_default(cli_arg: Option<&Path>, module_name: &str) -> Result<Self> {
        match resolve_config_path(cli_arg, module_name) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => {
                warn!("No configuration file found for {}, using defaults", module_name);
                Ok(Self::default())
            }
        }
    }

    /// Root folder: config value, then `NDA_ROOT_FOLDER`, then the OS default
    pub fn root_folder(&self) -> PathBuf {
        if let Some(root) = &self.root_folder {
            return root.clone();
        }
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
            return PathBuf::from(path);
        }
        default_root_folder()
    }

    /// Warehouse database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.root_folder().join("nda.db"))
    }

    /// Upstream schema folder
    pub fn upstream_folder(&self) -> PathBuf {
        self.upstream_folder
            .clone()
            .unwrap_or_else(|| self.root_folder().join("upstream"))
    }
}

/// Resolve the config file path by priority; `None` when nothing exists
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: User config directory
    dirs::config_dir()
        .map(|d| d.join("nda").join(format!("{}.toml", module_name)))
        .filter(|p| p.exists())
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("nda"))
        .unwrap_or_else(|| PathBuf::from("./nda_data"))
}
