//! Command execution plumbing for the docker CLI.
//!
//! Every daemon interaction goes through [`CommandExecutor`]: explicit
//! argv (no shell interpolation), optional working directory, an extended
//! child environment, a per-call timeout, and cooperative cancellation.
//! Individual commands live in submodules as builder structs that produce
//! their argv via `build_command_args`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as TokioCommand;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod container;
pub mod logs;
pub mod network;
pub mod run;
pub mod volume;

/// Executes docker CLI invocations with a shared configuration.
///
/// Cloning is cheap; clones share the cancellation token so a single
/// cancel reaches every in-flight call spawned from the same client.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    binary: PathBuf,
    context: Option<String>,
    workdir: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl CommandExecutor {
    /// Create an executor, locating the docker binary on `PATH`
    #[must_use]
    pub fn new() -> Self {
        let binary = which::which("docker").unwrap_or_else(|_| PathBuf::from("docker"));
        Self {
            binary,
            context: None,
            workdir: None,
            env: Vec::new(),
            timeout: Some(crate::DEFAULT_TIMEOUT),
            cancel: CancellationToken::new(),
        }
    }

    /// Route calls through a named docker context (`DOCKER_CONTEXT`)
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Run the child in the given working directory
    #[must_use]
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Add one variable to the child environment
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add multiple variables to the child environment
    #[must_use]
    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove the timeout entirely; the call stays cancellable
    #[must_use]
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Thread a caller-supplied cancellation token into every call
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cancellation token observed by calls on this executor
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The working directory, when set
    #[must_use]
    pub fn current_workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// Operation path for error reporting, derived from the leading argv words
    pub(crate) fn op_path(args: &[String]) -> String {
        let mut op = String::from("docker");
        for part in args.iter().take(2) {
            if part.starts_with('-') {
                break;
            }
            op.push('.');
            op.push_str(part);
        }
        op
    }

    /// Build the base child process: binary, argv, cwd, environment.
    ///
    /// Shared with the streaming paths, which attach their own stdio.
    pub(crate) fn base_command(&self, args: &[String]) -> TokioCommand {
        let mut command = TokioCommand::new(&self.binary);
        command.args(args);
        if let Some(ref dir) = self.workdir {
            command.current_dir(dir);
        }
        if let Some(ref context) = self.context {
            command.env("DOCKER_CONTEXT", context);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command.kill_on_drop(true);
        command
    }

    /// Run the given argv to completion and capture output.
    ///
    /// # Errors
    ///
    /// `External` on non-zero exit (message is stderr verbatim) or timeout,
    /// `Canceled` when the cancellation token fires first.
    pub async fn execute(&self, args: &[String]) -> Result<CommandOutput> {
        let op = Self::op_path(args);
        if self.cancel.is_cancelled() {
            return Err(Error::canceled(op));
        }
        debug!(argv = ?args, "spawning docker");

        let mut command = self.base_command(args);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let child = command.spawn().map_err(|e| {
            let message = format!("failed to spawn {}: {e}", self.binary.display());
            Error::external(op.clone(), message).with_source(e)
        })?;

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            () = self.cancel.cancelled() => {
                return Err(Error::canceled(op));
            }
            () = sleep_opt(self.timeout) => {
                let secs = self.timeout.unwrap_or_default().as_secs();
                return Err(Error::external(op, format!("timed out after {secs}s")));
            }
            result = &mut wait => result.map_err(|e| {
                Error::external(op.clone(), format!("failed to wait for docker: {e}")).with_source(e)
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        let duration = started.elapsed();

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!("exited with status {exit_code}")
            } else {
                stderr
            };
            return Err(Error::external(op, message));
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            duration,
        })
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for the given duration, or forever when unset
async fn sleep_opt(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Captured output of a completed docker invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
    /// Wall-clock duration of the call
    pub duration: Duration,
}

impl CommandOutput {
    /// Get stdout lines as a vector
    #[must_use]
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }

    /// Check if stdout is empty
    #[must_use]
    pub fn stdout_is_empty(&self) -> bool {
        self.stdout.trim().is_empty()
    }
}

/// Base trait for docker commands
#[async_trait]
pub trait DockerCommand {
    /// The output type this command produces
    type Output;

    /// Get the command executor
    fn get_executor(&self) -> &CommandExecutor;

    /// Build the complete argv after the docker binary
    fn build_command_args(&self) -> Vec<String>;

    /// Execute the command and return the typed output
    async fn execute(&self) -> Result<Self::Output>;

    /// Run the built argv through the executor
    async fn execute_command(&self) -> Result<CommandOutput> {
        let args = self.build_command_args();
        self.get_executor().execute(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_path_from_argv() {
        let args: Vec<String> = ["volume", "create", "data"]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(CommandExecutor::op_path(&args), "docker.volume.create");
    }

    #[test]
    fn test_op_path_stops_at_flags() {
        let args: Vec<String> = ["ps", "--format", "{{json .}}"]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(CommandExecutor::op_path(&args), "docker.ps");
    }

    #[test]
    fn test_executor_builder() {
        let executor = CommandExecutor::new()
            .context("remote")
            .workdir("/tmp")
            .env("COMPOSE_IGNORE_ORPHANS", "1")
            .timeout(Duration::from_secs(5));
        assert_eq!(executor.context.as_deref(), Some("remote"));
        assert_eq!(executor.current_workdir(), Some(Path::new("/tmp")));
        assert_eq!(executor.env.len(), 1);
        assert_eq!(executor.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        // The token is checked at entry, so no docker daemon is required.
        let executor = CommandExecutor::new().cancel_token(token);
        let args = vec!["version".to_string(), "--format".to_string(), "x".to_string()];
        let err = executor.execute(&args).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Canceled);
    }
}
