//! Database seeding via the in-instance mysql client

use crate::error::{RespawnError, RespawnResult};
use crate::seed::Seeder;
use crate::service::{ExecOutput, ServiceHandle};
use async_trait::async_trait;
use tracing::{debug, info};

/// Connection credentials for the database instance
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DbCredentials {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }
}

/// Run a single SQL statement through the mysql client inside the instance
pub async fn run_sql(
    handle: &dyn ServiceHandle,
    creds: &DbCredentials,
    sql: &str,
) -> RespawnResult<ExecOutput> {
    let cmd = vec![
        "mysql".to_string(),
        "-u".to_string(),
        creds.user.clone(),
        format!("-p{}", creds.password),
        "-D".to_string(),
        creds.database.clone(),
        "-e".to_string(),
        sql.to_string(),
    ];

    let output = handle.execute(&cmd).await?;
    output.require_success(handle.role(), "mysql -e")
}

/// Replay a SQL script file already present in the instance filesystem
///
/// Shell redirection keeps the script out of the argument list, so dumps of
/// arbitrary size replay without hitting argv limits.
pub async fn run_script(
    handle: &dyn ServiceHandle,
    creds: &DbCredentials,
    script_path: &str,
) -> RespawnResult<ExecOutput> {
    let cmd = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!(
            "mysql -u {} -p{} -D {} < {}",
            creds.user, creds.password, creds.database, script_path
        ),
    ];

    let output = handle.execute(&cmd).await?;
    output.require_success(handle.role(), "mysql < script")
}

/// Seeds the database by applying an ordered changelog of SQL scripts
///
/// The changelog is the library consumer's schema-plus-data migration
/// sequence, each entry one SQL body executed with `mysql -e`.
pub struct SqlChangelogSeeder {
    creds: DbCredentials,
    changelog: Vec<String>,
}

impl SqlChangelogSeeder {
    pub fn new(creds: DbCredentials, changelog: Vec<String>) -> Self {
        Self { creds, changelog }
    }
}

#[async_trait]
impl Seeder for SqlChangelogSeeder {
    async fn seed(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        let role = handle.role();
        info!(
            "Applying {} changelog entries to {}",
            self.changelog.len(),
            role
        );

        for (idx, sql) in self.changelog.iter().enumerate() {
            debug!("Changelog entry {} for {}", idx, role);
            run_sql(handle, &self.creds, sql)
                .await
                .map_err(|e| RespawnError::Seed {
                    role,
                    reason: format!("changelog entry {}: {}", idx, e),
                })?;
        }

        info!("Finished seeding {}", role);
        Ok(())
    }
}
