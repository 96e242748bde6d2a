//! Docker Compose ps command.

use crate::command::{CommandExecutor, CommandOutput};
use crate::compose::{ComposeCommand, ComposeProject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Docker Compose ps command
#[derive(Debug, Clone)]
pub struct ComposePsCommand {
    /// Project options
    pub project: ComposeProject,
    all: bool,
    /// Command executor
    pub executor: CommandExecutor,
}

impl ComposePsCommand {
    /// Create a new compose ps command
    #[must_use]
    pub fn new(project: ComposeProject, executor: CommandExecutor) -> Self {
        Self {
            project,
            all: false,
            executor: executor.timeout(crate::PS_TIMEOUT),
        }
    }

    /// Include stopped services
    #[must_use]
    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    /// Parse `--format json` output.
    ///
    /// Compose emits a JSON array in some versions and newline-delimited
    /// objects in others; both shapes are accepted.
    ///
    /// # Errors
    ///
    /// `Internal` when neither shape parses.
    pub fn parse(output: &CommandOutput) -> Result<Vec<ComposeContainer>> {
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if trimmed.starts_with('[') {
            return serde_json::from_str(trimmed).map_err(|e| {
                Error::internal("docker.compose.ps", format!("unparseable output: {e}"))
                    .with_source(e)
            });
        }
        trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    Error::internal("docker.compose.ps", format!("unparseable line: {e}"))
                        .with_source(e)
                })
            })
            .collect()
    }
}

/// One service container reported by compose ps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeContainer {
    /// Container name
    #[serde(rename = "Name")]
    pub name: String,
    /// Service name
    #[serde(rename = "Service", default)]
    pub service: String,
    /// Lifecycle state
    #[serde(rename = "State", default)]
    pub state: String,
}

#[async_trait]
impl ComposeCommand for ComposePsCommand {
    type Output = Vec<ComposeContainer>;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn get_project(&self) -> &ComposeProject {
        &self.project
    }

    fn subcommand(&self) -> &'static str {
        "ps"
    }

    fn build_subcommand_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.all {
            args.push("--all".to_string());
        }
        args.push("--format".to_string());
        args.push("json".to_string());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        let output = self.execute_compose().await?;
        Self::parse(&output)
    }
}
