//! Engine settings
//!
//! Bootstrap values come from the TOML file; the effective values live in
//! the warehouse `settings` table so every process sharing the warehouse
//! sees the same sync thresholds.

use crate::error::Result;
use nda_common::config::{ConfirmPolicyKind, TomlConfig};
use nda_common::db::settings::{get_setting_u64, set_setting};
use sqlx::SqlitePool;
use tracing::debug;

pub const MAX_LOCK_WAIT_KEY: &str = "sync_max_lock_wait_ms";
pub const CONFIRM_THRESHOLD_KEY: &str = "sync_confirm_threshold";

/// Settings read by the populator
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Gated variants ask for confirmation when they have more candidates than this
    pub confirm_threshold: usize,
    pub confirm_policy: ConfirmPolicyKind,
    /// Budget for retrying a locked write
    pub max_lock_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            confirm_threshold: 0,
            confirm_policy: ConfirmPolicyKind::Prompt,
            max_lock_wait_ms: 5000,
        }
    }
}

impl EngineSettings {
    /// Read the stored settings; the policy is not stored and stays `Prompt`
    pub async fn from_settings(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();
        let threshold = get_setting_u64(pool, CONFIRM_THRESHOLD_KEY, defaults.confirm_threshold as u64).await?;
        let max_lock_wait_ms = get_setting_u64(pool, MAX_LOCK_WAIT_KEY, defaults.max_lock_wait_ms).await?;

        Ok(Self {
            confirm_threshold: usize::try_from(threshold).unwrap_or(usize::MAX),
            max_lock_wait_ms,
            ..defaults
        })
    }

    /// Write the TOML values over the seeded settings, then read them back
    pub async fn apply_toml(pool: &SqlitePool, config: &TomlConfig) -> Result<Self> {
        set_setting(pool, CONFIRM_THRESHOLD_KEY, &config.sync.confirm_threshold.to_string()).await?;
        set_setting(pool, MAX_LOCK_WAIT_KEY, &config.sync.max_lock_wait_ms.to_string()).await?;

        let settings = Self {
            confirm_policy: config.sync.confirm_policy,
            ..Self::from_settings(pool).await?
        };
        debug!(?settings, "Engine settings loaded");
        Ok(settings)
    }
}
