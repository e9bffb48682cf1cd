//! Seeding freshly started instances
//!
//! A [`Seeder`] brings one empty service instance to the known initial
//! domain state. Seeders run exactly once per instance, on the cache-miss
//! path of the bootstrapper; every test after that is served from the
//! snapshot cache instead.

pub mod database;
pub mod search;

pub use database::{run_script, run_sql, DbCredentials, SqlChangelogSeeder};
pub use search::{call_engine, delete_indices, BulkIndexSeeder, EngineCall, SearchCredentials};

use crate::error::RespawnResult;
use crate::service::ServiceHandle;
use async_trait::async_trait;

/// Domain-specific initialization of one service instance
#[async_trait]
pub trait Seeder: Send + Sync {
    /// Apply the full initialization sequence to the instance
    ///
    /// Completion and failure are synchronous; a failure aborts the whole
    /// environment setup.
    async fn seed(&self, handle: &dyn ServiceHandle) -> RespawnResult<()>;
}
