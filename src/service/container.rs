//! Container-CLI-backed service handle
//!
//! Implements [`ServiceHandle`] by shelling out to a container CLI
//! (`docker` or `podman`) against a container that something else already
//! started. `execute` maps to `<cli> exec`, the copy operations to
//! `<cli> cp`.

use crate::config::ContainerConfig;
use crate::error::{RespawnError, RespawnResult};
use crate::service::{ExecOutput, Role, ServiceHandle};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A running container fulfilling one role
pub struct ContainerHandle {
    role: Role,
    container_id: String,
    cli_bin: String,
}

impl ContainerHandle {
    /// Wrap an existing container
    pub fn new(role: Role, container_id: impl Into<String>, cli_bin: impl Into<String>) -> Self {
        Self {
            role,
            container_id: container_id.into(),
            cli_bin: cli_bin.into(),
        }
    }

    /// Wrap an existing container, taking the CLI from configuration
    pub fn from_config(
        role: Role,
        container_id: impl Into<String>,
        config: &ContainerConfig,
    ) -> Self {
        Self::new(role, container_id, config.cli_bin.clone())
    }

    /// The wrapped container's id
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// The container CLI binary this handle shells out to
    pub fn cli_bin(&self) -> &str {
        &self.cli_bin
    }

    /// Run the container CLI with the given arguments, capturing output
    async fn cli(&self, args: &[String]) -> RespawnResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.cli_bin, args);

        Command::new(&self.cli_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RespawnError::command_failed(format!("{} {:?}", self.cli_bin, args), e))
    }

    /// Run the CLI and require exit code 0
    async fn cli_checked(&self, args: &[String]) -> RespawnResult<ExecOutput> {
        let command = format!("{} {}", self.cli_bin, args.join(" "));
        let output = self.cli(args).await?;
        to_exec_output(&output).require_success(self.role, &command)
    }
}

fn to_exec_output(output: &std::process::Output) -> ExecOutput {
    ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

#[async_trait]
impl ServiceHandle for ContainerHandle {
    fn role(&self) -> Role {
        self.role
    }

    async fn execute(&self, cmd: &[String]) -> RespawnResult<ExecOutput> {
        let mut args = vec!["exec".to_string(), self.container_id.clone()];
        args.extend(cmd.iter().cloned());

        // Exit code is the in-container command's, reported as-is; the
        // caller decides whether non-zero is fatal.
        let output = self.cli(&args).await?;
        Ok(to_exec_output(&output))
    }

    async fn copy_file_in(&self, host_path: &Path, instance_path: &str) -> RespawnResult<()> {
        let args = vec![
            "cp".to_string(),
            host_path.display().to_string(),
            format!("{}:{}", self.container_id, instance_path),
        ];
        self.cli_checked(&args).await?;
        Ok(())
    }

    async fn copy_file_out(&self, instance_path: &str, host_path: &Path) -> RespawnResult<()> {
        let args = vec![
            "cp".to_string(),
            format!("{}:{}", self.container_id, instance_path),
            host_path.display().to_string(),
        ];
        self.cli_checked(&args).await?;
        Ok(())
    }
}
