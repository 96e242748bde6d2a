//! Docker Compose config command.
//!
//! `config` is the drift oracle: the resolved document feeds the overlay
//! builder, `--services` enumerates runnable services, and `--hash` is
//! the per-service digest compared against container labels.

use crate::command::{CommandExecutor, CommandOutput};
use crate::compose::{ComposeCommand, ComposeProject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Output format for `compose config`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (compose default)
    Yaml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// CLI argument value
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

/// Docker Compose config command
#[derive(Debug, Clone)]
pub struct ComposeConfigCommand {
    /// Project options
    pub project: ComposeProject,
    format: Option<ConfigFormat>,
    services: bool,
    hash: Option<String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl ComposeConfigCommand {
    /// Create a new config command
    #[must_use]
    pub fn new(project: ComposeProject, executor: CommandExecutor) -> Self {
        Self {
            project,
            format: None,
            services: false,
            hash: None,
            executor,
        }
    }

    /// Request a specific output format
    #[must_use]
    pub fn format(mut self, format: ConfigFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// List service names instead of the document
    #[must_use]
    pub fn services(mut self) -> Self {
        self.services = true;
        self
    }

    /// Print config hashes for the selector (`*` or comma-joined names)
    #[must_use]
    pub fn hash(mut self, selector: impl Into<String>) -> Self {
        self.hash = Some(selector.into());
        self
    }

    /// Parse `--services` output into sorted names
    #[must_use]
    pub fn parse_services(output: &CommandOutput) -> Vec<String> {
        let mut services: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect();
        services.sort();
        services
    }

    /// Parse `--hash` output (`<service> <hash>` per line) into a map
    ///
    /// # Errors
    ///
    /// `Internal` when a line does not match the expected shape.
    pub fn parse_hashes(output: &CommandOutput) -> Result<BTreeMap<String, String>> {
        let mut hashes = BTreeMap::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(service), Some(hash)) = (parts.next(), parts.next()) else {
                return Err(Error::internal(
                    "docker.compose.config",
                    format!("unexpected hash line: {line:?}"),
                ));
            };
            hashes.insert(service.to_string(), hash.to_string());
        }
        Ok(hashes)
    }
}

#[async_trait]
impl ComposeCommand for ComposeConfigCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn get_project(&self) -> &ComposeProject {
        &self.project
    }

    fn subcommand(&self) -> &'static str {
        "config"
    }

    fn build_subcommand_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(format) = self.format {
            args.push("--format".to_string());
            args.push(format.as_arg().to_string());
        }
        if self.services {
            args.push("--services".to_string());
        }
        if let Some(ref selector) = self.hash {
            args.push("--hash".to_string());
            args.push(selector.clone());
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

    fn project() -> ComposeProject {
        ComposeProject::new("/srv/web").file("compose.yaml").project_name("web")
    }

    #[test]
    fn test_config_args_full_json() {
        let cmd = ComposeConfigCommand::new(project(), CommandExecutor::new())
            .format(ConfigFormat::Json);
        assert_eq!(
            cmd.build_command_args(),
            vec![
                "compose",
                "--file",
                "compose.yaml",
                "--project-name",
                "web",
                "config",
                "--format",
                "json",
            ]
        );
    }

    #[test]
    fn test_config_args_services() {
        let cmd = ComposeConfigCommand::new(project(), CommandExecutor::new()).services();
        let args = cmd.build_command_args();
        assert!(args.contains(&"--services".to_string()));
    }

    #[test]
    fn test_config_args_hash() {
        let cmd = ComposeConfigCommand::new(project(), CommandExecutor::new()).hash("web,db");
        let args = cmd.build_command_args();
        let at = args.iter().position(|a| a == "--hash").unwrap();
        assert_eq!(args[at + 1], "web,db");
    }

    #[test]
    fn test_parse_hashes() {
        let output = CommandOutput {
            stdout: "web 1111\ndb 2222\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: std::time::Duration::ZERO,
        };
        let hashes = ComposeConfigCommand::parse_hashes(&output).unwrap();
        assert_eq!(hashes.get("web").map(String::as_str), Some("1111"));
        assert_eq!(hashes.get("db").map(String::as_str), Some("2222"));
    }

    #[test]
    fn test_parse_services_sorted() {
        let output = CommandOutput {
            stdout: "web\napi\n\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: std::time::Duration::ZERO,
        };
        assert_eq!(
            ComposeConfigCommand::parse_services(&output),
            vec!["api", "web"]
        );
    }
}
