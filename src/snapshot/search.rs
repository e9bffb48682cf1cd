//! Search engine snapshot: fs repository archived to one tar file
//!
//! Capture registers a filesystem snapshot repository, takes a named
//! snapshot into it, then archives the repository directory into a single
//! file so the cache only ever moves whole artifacts. Restore clears the
//! seeded indices first so the engine restores into a clean target.

use crate::error::{RespawnError, RespawnResult};
use crate::seed::search::{call_engine, delete_indices, EngineCall, SearchCredentials};
use crate::service::{Role, ServiceHandle};
use crate::snapshot::{Snapshot, SEARCH_ARCHIVE_PATH, SEARCH_REPO_DIR};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

const REPOSITORY: &str = "respawn-backup";
const SNAPSHOT: &str = "seed";

/// Snapshot of the search engine as an archived fs repository
pub struct SearchSnapshot {
    creds: SearchCredentials,
    indices: Vec<String>,
}

impl SearchSnapshot {
    /// `indices` are the seeded, non-system indices this snapshot covers;
    /// restore deletes exactly these before replaying the snapshot.
    pub fn new(creds: SearchCredentials, indices: Vec<String>) -> Self {
        Self { creds, indices }
    }

    async fn register_repository(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        let body = format!(
            r#"{{"type": "fs", "settings": {{"location": "{}"}}}}"#,
            SEARCH_REPO_DIR
        );
        call_engine(
            handle,
            &self.creds,
            &EngineCall::with_payload("PUT", format!("/_snapshot/{}", REPOSITORY), body),
        )
        .await?;
        Ok(())
    }

    fn capture_err(e: impl ToString) -> RespawnError {
        RespawnError::Capture {
            role: Role::Search,
            reason: e.to_string(),
        }
    }

    fn prepare_err(e: impl ToString) -> RespawnError {
        RespawnError::Prepare {
            role: Role::Search,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl Snapshot for SearchSnapshot {
    fn role(&self) -> Role {
        Role::Search
    }

    fn instance_path(&self) -> &'static str {
        SEARCH_ARCHIVE_PATH
    }

    async fn capture(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        info!("Snapshotting search engine into {}", SEARCH_REPO_DIR);

        self.register_repository(handle)
            .await
            .map_err(Self::capture_err)?;

        call_engine(
            handle,
            &self.creds,
            &EngineCall::new(
                "PUT",
                format!(
                    "/_snapshot/{}/{}?wait_for_completion=true",
                    REPOSITORY, SNAPSHOT
                ),
            ),
        )
        .await
        .map_err(Self::capture_err)?;

        debug!("Archiving repository to {}", SEARCH_ARCHIVE_PATH);
        let tar = vec![
            "tar".to_string(),
            "-cf".to_string(),
            SEARCH_ARCHIVE_PATH.to_string(),
            "-C".to_string(),
            SEARCH_REPO_DIR.to_string(),
            ".".to_string(),
        ];
        let output = handle.execute(&tar).await?;
        output
            .require_success(Role::Search, "tar -cf")
            .map_err(Self::capture_err)?;
        Ok(())
    }

    async fn prepare(
        &self,
        handle: &dyn ServiceHandle,
        artifact_host_path: &Path,
    ) -> RespawnResult<()> {
        debug!(
            "Unpacking cached archive {} into {}",
            artifact_host_path.display(),
            SEARCH_REPO_DIR
        );

        handle
            .copy_file_in(artifact_host_path, SEARCH_ARCHIVE_PATH)
            .await
            .map_err(Self::prepare_err)?;

        let untar = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!(
                "mkdir -p {dir} && tar -xf {archive} -C {dir}",
                dir = SEARCH_REPO_DIR,
                archive = SEARCH_ARCHIVE_PATH
            ),
        ];
        let output = handle.execute(&untar).await?;
        output
            .require_success(Role::Search, "tar -xf")
            .map_err(Self::prepare_err)?;

        // The unpacked repository is only restorable once the engine knows
        // about it.
        self.register_repository(handle)
            .await
            .map_err(Self::prepare_err)?;
        Ok(())
    }

    async fn restore(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        let restore_err = |e: RespawnError| RespawnError::Restore {
            role: Role::Search,
            reason: e.to_string(),
        };

        let indices: Vec<&str> = self.indices.iter().map(String::as_str).collect();
        debug!("Clearing indices {:?} before restore", indices);
        delete_indices(handle, &self.creds, &indices)
            .await
            .map_err(restore_err)?;

        call_engine(
            handle,
            &self.creds,
            &EngineCall::new(
                "POST",
                format!(
                    "/_snapshot/{}/{}/_restore?wait_for_completion=true",
                    REPOSITORY, SNAPSHOT
                ),
            ),
        )
        .await
        .map_err(restore_err)?;
        Ok(())
    }
}
