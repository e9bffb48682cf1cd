//! Service instance abstraction
//!
//! A [`ServiceHandle`] is the capability seam to one externally-managed,
//! running backing service: execute a command inside the instance and copy
//! files in or out. Starting and stopping instances is the collaborator's
//! job; respawn never owns instance lifecycle.

pub mod container;

pub use container::ContainerHandle;

use crate::error::{RespawnError, RespawnResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Logical role of a backing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Relational database (MySQL)
    Database,
    /// Search/indexing engine (Elasticsearch)
    Search,
}

impl Role {
    /// Host-side artifact file name for this role
    pub fn artifact_file_name(&self) -> &'static str {
        match self {
            Self::Database => "database.sql",
            Self::Search => "search.tar",
        }
    }

    /// Both roles, in no particular order
    pub fn all() -> &'static [Self] {
        &[Self::Database, Self::Search]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Search => write!(f, "search"),
        }
    }
}

/// Lifecycle state of a service instance, as driven by respawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Starting,
    Ready,
    Seeding,
    Seeded,
    Restoring,
    Reset,
}

/// Captured output of a command executed inside an instance
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Process exit code (-1 if terminated by signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Map a non-zero exit to an error carrying the captured output
    pub fn require_success(self, role: Role, command: &str) -> RespawnResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RespawnError::CommandExecution {
                role,
                command: command.to_string(),
                code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Capability interface to one running service instance
///
/// Implementations talk to whatever runs the instance (a container CLI in
/// [`ContainerHandle`], an in-memory fake in tests). All calls are blocking
/// I/O from the caller's perspective; respawn parallelizes across roles,
/// never within one handle's sequence of calls.
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    /// The role this instance fills
    fn role(&self) -> Role;

    /// Execute a command inside the instance, capturing output
    async fn execute(&self, cmd: &[String]) -> RespawnResult<ExecOutput>;

    /// Copy a file from the host into the instance filesystem
    async fn copy_file_in(&self, host_path: &Path, instance_path: &str) -> RespawnResult<()>;

    /// Copy a file from the instance filesystem to the host
    async fn copy_file_out(&self, instance_path: &str, host_path: &Path) -> RespawnResult<()>;
}

/// A handle paired with its tracked lifecycle state
///
/// State updates are only ever made by the single task currently driving
/// this instance; the mutex exists so the instance can be shared with
/// observers, not to serialize drivers.
pub struct ServiceInstance {
    handle: Arc<dyn ServiceHandle>,
    state: Mutex<ServiceState>,
}

impl ServiceInstance {
    /// Wrap a handle, starting in [`ServiceState::Ready`]
    pub fn new(handle: Arc<dyn ServiceHandle>) -> Self {
        Self {
            handle,
            state: Mutex::new(ServiceState::Ready),
        }
    }

    pub fn role(&self) -> Role {
        self.handle.role()
    }

    pub fn handle(&self) -> &Arc<dyn ServiceHandle> {
        &self.handle
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a lifecycle transition
    pub fn set_state(&self, state: ServiceState) {
        debug!("{} instance: {:?} -> {:?}", self.role(), self.state(), state);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("role", &self.role())
            .field("state", &self.state())
            .finish()
    }
}
