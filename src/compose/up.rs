//! Docker Compose up command.

use crate::command::{CommandExecutor, CommandOutput};
use crate::compose::{ComposeCommand, ComposeProject};
use crate::error::Result;
use async_trait::async_trait;

/// Docker Compose up command, always detached.
///
/// Reconciliation never attaches to service output; `up -d` returns once
/// containers are created and started. The call uses the long compose
/// timeout since image pulls may dominate.
#[derive(Debug, Clone)]
pub struct ComposeUpCommand {
    /// Project options
    pub project: ComposeProject,
    wait: bool,
    /// Command executor
    pub executor: CommandExecutor,
}

impl ComposeUpCommand {
    /// Create a new up command
    #[must_use]
    pub fn new(project: ComposeProject, executor: CommandExecutor) -> Self {
        Self {
            project,
            wait: false,
            executor: executor.timeout(crate::COMPOSE_UP_TIMEOUT),
        }
    }

    /// Wait for services to be running or healthy
    #[must_use]
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }
}

#[async_trait]
impl ComposeCommand for ComposeUpCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn get_project(&self) -> &ComposeProject {
        &self.project
    }

    fn subcommand(&self) -> &'static str {
        "up"
    }

    fn build_subcommand_args(&self) -> Vec<String> {
        let mut args = vec!["--detach".to_string()];
        if self.wait {
            args.push("--wait".to_string());
        }
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        self.execute_compose().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_args() {
        let project = ComposeProject::new("/srv/web")
            .file("overlay.yaml")
            .project_name("web");
        let cmd = ComposeUpCommand::new(project, CommandExecutor::new());
        assert_eq!(
            cmd.build_command_args(),
            vec![
                "compose",
                "--file",
                "overlay.yaml",
                "--project-name",
                "web",
                "up",
                "--detach",
            ]
        );
    }

    #[test]
    fn test_up_args_wait() {
        let cmd = ComposeUpCommand::new(ComposeProject::new("."), CommandExecutor::new()).wait();
        let args = cmd.build_command_args();
        assert!(args.contains(&"--wait".to_string()));
    }
}
