//! Database snapshot: mysqldump out, script replay back

use crate::error::{RespawnError, RespawnResult};
use crate::seed::database::{run_script, DbCredentials};
use crate::service::{Role, ServiceHandle};
use crate::snapshot::{Snapshot, DATABASE_DUMP_PATH};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

/// Snapshot of the relational database as a single SQL dump
pub struct DatabaseSnapshot {
    creds: DbCredentials,
}

impl DatabaseSnapshot {
    pub fn new(creds: DbCredentials) -> Self {
        Self { creds }
    }
}

#[async_trait]
impl Snapshot for DatabaseSnapshot {
    fn role(&self) -> Role {
        Role::Database
    }

    fn instance_path(&self) -> &'static str {
        DATABASE_DUMP_PATH
    }

    async fn capture(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        info!("Dumping database to {}", DATABASE_DUMP_PATH);

        // --add-drop-database makes the replay self-resetting: restoring
        // drops and recreates the schema before loading rows.
        let cmd = vec![
            "mysqldump".to_string(),
            "-u".to_string(),
            self.creds.user.clone(),
            format!("-p{}", self.creds.password),
            "-r".to_string(),
            DATABASE_DUMP_PATH.to_string(),
            "--add-drop-database".to_string(),
            "--compact".to_string(),
            "--databases".to_string(),
            self.creds.database.clone(),
        ];

        let output = handle.execute(&cmd).await?;
        output
            .require_success(Role::Database, "mysqldump")
            .map_err(|e| RespawnError::Capture {
                role: Role::Database,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn prepare(
        &self,
        handle: &dyn ServiceHandle,
        artifact_host_path: &Path,
    ) -> RespawnResult<()> {
        debug!(
            "Copying cached dump {} into instance",
            artifact_host_path.display()
        );
        handle
            .copy_file_in(artifact_host_path, DATABASE_DUMP_PATH)
            .await
            .map_err(|e| RespawnError::Prepare {
                role: Role::Database,
                reason: e.to_string(),
            })
    }

    async fn restore(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        debug!("Replaying {}", DATABASE_DUMP_PATH);
        run_script(handle, &self.creds, DATABASE_DUMP_PATH)
            .await
            .map_err(|e| RespawnError::Restore {
                role: Role::Database,
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
