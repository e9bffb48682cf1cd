//! Snapshot artifacts: capture, prepare, restore
//!
//! A snapshot is one portable file capturing a fully-seeded instance's
//! state. Each role produces its artifact at a fixed absolute path inside
//! the instance; the cache layer moves it between instance and host. An
//! artifact is versionless: there is exactly one per role per cache.

pub mod database;
pub mod search;

pub use database::DatabaseSnapshot;
pub use search::SearchSnapshot;

use crate::error::RespawnResult;
use crate::service::{Role, ServiceHandle};
use async_trait::async_trait;
use std::path::Path;

/// In-instance location of the database dump
pub const DATABASE_DUMP_PATH: &str = "/tmp/respawn-snapshot.sql";

/// In-instance directory backing the search engine's fs repository
///
/// Must be covered by the engine's `path.repo` setting.
pub const SEARCH_REPO_DIR: &str = "/tmp/respawn-repo";

/// In-instance location of the archived repository
pub const SEARCH_ARCHIVE_PATH: &str = "/tmp/respawn-repo.tar";

/// Per-role snapshot operations
#[async_trait]
pub trait Snapshot: Send + Sync {
    /// The role this snapshot handles
    fn role(&self) -> Role;

    /// Fixed absolute path of the artifact inside the instance
    fn instance_path(&self) -> &'static str;

    /// Export the instance's current state into one artifact file at
    /// [`instance_path`](Snapshot::instance_path)
    async fn capture(&self, handle: &dyn ServiceHandle) -> RespawnResult<()>;

    /// Make a cached artifact restorable on this instance: copy it in from
    /// `artifact_host_path` and perform any registration the engine needs
    async fn prepare(
        &self,
        handle: &dyn ServiceHandle,
        artifact_host_path: &Path,
    ) -> RespawnResult<()>;

    /// Reset live state from the in-instance artifact
    ///
    /// Assumes a prior successful [`capture`](Snapshot::capture) or
    /// [`prepare`](Snapshot::prepare) on this instance.
    async fn restore(&self, handle: &dyn ServiceHandle) -> RespawnResult<()>;
}
