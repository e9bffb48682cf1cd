//! Error types for respawn
//!
//! All modules use `RespawnResult<T>` as their return type. Two outcomes
//! are deliberately *not* errors and never appear here: losing the
//! populator-lock race (`SnapshotCache::try_become_populator` returns
//! `Ok(None)`) and a restore exceeding its wait budget
//! (`RestoreOutcome::TimedOut`).

use crate::service::Role;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for respawn operations
pub type RespawnResult<T> = Result<T, RespawnError>;

/// All errors that can occur in respawn
#[derive(Error, Debug)]
pub enum RespawnError {
    // Seeding and snapshot errors
    #[error("seeding {role} failed: {reason}")]
    Seed { role: Role, reason: String },

    #[error("capturing {role} snapshot failed: {reason}")]
    Capture { role: Role, reason: String },

    #[error("preparing {role} for restore failed: {reason}")]
    Prepare { role: Role, reason: String },

    #[error("restoring {role} failed: {reason}")]
    Restore { role: Role, reason: String },

    #[error("setup for {role} did not finish within {budget_secs}s")]
    SetupTimeout { role: Role, budget_secs: u64 },

    // Cache errors
    #[error("cached artifact for {role} missing: expected {path}")]
    ArtifactMissing { role: Role, path: PathBuf },

    #[error("failed to acquire populator lock at {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Instance command errors
    #[error("command failed to launch: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with {code} in {role} instance: {command}, stdout: [{stdout}], stderr: [{stderr}]")]
    CommandExecution {
        role: Role,
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    // Configuration errors
    #[error("invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Background task errors
    #[error("worker task for {role} panicked")]
    TaskPanicked { role: Role },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl RespawnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// The role this error concerns, if any
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Seed { role, .. }
            | Self::Capture { role, .. }
            | Self::Prepare { role, .. }
            | Self::Restore { role, .. }
            | Self::SetupTimeout { role, .. }
            | Self::ArtifactMissing { role, .. }
            | Self::CommandExecution { role, .. }
            | Self::TaskPanicked { role } => Some(*role),
            _ => None,
        }
    }

    /// Whether this error is fatal to the whole test run (as opposed to a
    /// single test case's reset)
    pub fn is_setup_fatal(&self) -> bool {
        !matches!(self, Self::Restore { .. })
    }
}
