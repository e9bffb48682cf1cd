//! Configuration schema for respawn
//!
//! Configuration is stored at `~/.config/respawn/config.toml`; every field
//! has a default so the file is optional.

use crate::service::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot cache settings
    pub cache: CacheConfig,

    /// Wait budgets for setup and per-test restores
    pub budgets: BudgetConfig,

    /// Container CLI settings
    pub container: ContainerConfig,
}

/// Snapshot cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory override; when unset the default resolution order
    /// applies (env var, user cache dir, working directory)
    pub dir: Option<PathBuf>,
}

/// Wait budgets, in seconds
///
/// The one-time seed/capture phase gets a generous budget because it runs
/// once per cache lifetime; per-test restores get tight, independent
/// budgets because they run before every test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// One-time setup budget per role (seed + capture, or prepare)
    pub setup_secs: u64,

    /// Per-test wait budget for the database script replay
    pub database_restore_secs: u64,

    /// Per-test wait budget for the search engine restore
    pub search_restore_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            setup_secs: 120,
            database_restore_secs: 5,
            search_restore_secs: 3,
        }
    }
}

impl BudgetConfig {
    /// Setup budget as a duration
    pub fn setup(&self) -> Duration {
        Duration::from_secs(self.setup_secs)
    }

    /// Restore budget for a role
    pub fn restore(&self, role: Role) -> Duration {
        match role {
            Role::Database => Duration::from_secs(self.database_restore_secs),
            Role::Search => Duration::from_secs(self.search_restore_secs),
        }
    }
}

/// Container CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Binary used for `exec`/`cp` against instances
    pub cli_bin: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cli_bin: "docker".to_string(),
        }
    }
}
