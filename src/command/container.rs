//! Docker container commands.
//!
//! Listing uses `ps --format '{{json .}}'` so every row is typed; the
//! lifecycle commands (stop, start, rm, pause, unpause, restart) are thin
//! argv builders in the same shape.

use crate::command::volume::{nullable_map, parse_json_lines, parse_label_string};
use crate::command::{CommandExecutor, CommandOutput, DockerCommand};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Docker ps command
#[derive(Debug, Clone)]
pub struct PsCommand {
    all: bool,
    filters: Vec<String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl PsCommand {
    /// Create a new ps command
    #[must_use]
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            all: false,
            filters: Vec::new(),
            executor: executor.timeout(crate::PS_TIMEOUT),
        }
    }

    /// Include stopped containers
    #[must_use]
    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    /// Add a `--filter key=value` pair
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

#[async_trait]
impl DockerCommand for PsCommand {
    type Output = Vec<ContainerSummary>;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["ps".to_string()];
        if self.all {
            args.push("--all".to_string());
        }
        for filter in &self.filters {
            args.push("--filter".to_string());
            args.push(filter.clone());
        }
        args.push("--format".to_string());
        args.push("{{json .}}".to_string());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        let output = self.execute_command().await?;
        parse_json_lines(&output, "docker.ps")
    }
}

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container id
    #[serde(rename = "ID")]
    pub id: String,
    /// Container name (docker prints a single name here)
    #[serde(rename = "Names")]
    pub name: String,
    /// Image reference
    #[serde(rename = "Image", default)]
    pub image: String,
    /// Lifecycle state (`running`, `exited`, …)
    #[serde(rename = "State", default)]
    pub state: String,
    /// Comma-joined `key=value` labels
    #[serde(rename = "Labels", default)]
    pub labels: String,
}

impl ContainerSummary {
    /// Whether the container is currently running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// Parse the label string into a map
    #[must_use]
    pub fn label_map(&self) -> BTreeMap<String, String> {
        parse_label_string(&self.labels)
    }

    /// Value of one label, if present
    #[must_use]
    pub fn label(&self, key: &str) -> Option<String> {
        self.label_map().remove(key)
    }

    /// The compose service this container belongs to, if any
    #[must_use]
    pub fn compose_service(&self) -> Option<String> {
        self.label(crate::COMPOSE_SERVICE_LABEL)
    }

    /// The compose config hash stamped on this container, if any
    #[must_use]
    pub fn config_hash(&self) -> Option<String> {
        self.label(crate::COMPOSE_CONFIG_HASH_LABEL)
    }
}

/// Whether a label map marks a container as owned by the identifier.
///
/// The current form is `io.dockform.identifier=<id>`; the legacy
/// `io.dockform/<id>=1` key is recognized read-only and never emitted.
#[must_use]
pub fn labels_match_identifier(labels: &BTreeMap<String, String>, identifier: &str) -> bool {
    if labels
        .get(crate::IDENTIFIER_LABEL)
        .is_some_and(|value| value == identifier)
    {
        return true;
    }
    let legacy = format!("{}{identifier}", crate::LEGACY_IDENTIFIER_PREFIX);
    labels.get(&legacy).is_some_and(|value| value == "1")
}

/// Docker inspect restricted to container labels
#[derive(Debug, Clone)]
pub struct InspectLabelsCommand {
    name: String,
    /// Command executor
    pub executor: CommandExecutor,
}

impl InspectLabelsCommand {
    /// Create a new label inspect command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }
}

#[async_trait]
impl DockerCommand for InspectLabelsCommand {
    type Output = BTreeMap<String, String>;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .Config.Labels}}".to_string(),
            self.name.clone(),
        ]
    }

    async fn execute(&self) -> Result<Self::Output> {
        let output = self.execute_command().await?;
        #[derive(Deserialize)]
        struct Wrapper(#[serde(deserialize_with = "nullable_map")] BTreeMap<String, String>);
        let Wrapper(labels) =
            serde_json::from_str(output.stdout.trim()).map_err(|e| {
                Error::internal(
                    format!("docker.inspect[{}]", self.name),
                    format!("unparseable label output: {e}"),
                )
                .with_source(e)
            })?;
        Ok(labels)
    }
}

/// Container lifecycle verbs with identical argv shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleVerb {
    /// `docker container stop`
    Stop,
    /// `docker container start`
    Start,
    /// `docker container pause`
    Pause,
    /// `docker container unpause`
    Unpause,
    /// `docker container restart`
    Restart,
}

impl LifecycleVerb {
    /// CLI subcommand name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Restart => "restart",
        }
    }
}

/// Docker container stop/start/pause/unpause/restart command
#[derive(Debug, Clone)]
pub struct LifecycleCommand {
    verb: LifecycleVerb,
    name: String,
    /// Command executor
    pub executor: CommandExecutor,
}

impl LifecycleCommand {
    /// Create a lifecycle command for one container
    #[must_use]
    pub fn new(verb: LifecycleVerb, name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            verb,
            name: name.into(),
            executor,
        }
    }
}

#[async_trait]
impl DockerCommand for LifecycleCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        vec![
            "container".to_string(),
            self.verb.as_str().to_string(),
            self.name.clone(),
        ]
    }

    async fn execute(&self) -> Result<Self::Output> {
        self.execute_command().await
    }
}

/// Docker container rm command
#[derive(Debug, Clone)]
pub struct ContainerRmCommand {
    name: String,
    force: bool,
    /// Command executor
    pub executor: CommandExecutor,
}

impl ContainerRmCommand {
    /// Create a new container rm command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            force: false,
            executor,
        }
    }

    /// Force removal of a running container
    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

#[async_trait]
impl DockerCommand for ContainerRmCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["container".to_string(), "rm".to_string()];
        if self.force {
            args.push("--force".to_string());
        }
        args.push(self.name.clone());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        self.execute_command().await
    }
}

/// Docker container update restricted to label additions.
///
/// Used when adopting pre-existing containers into the managed scope.
#[derive(Debug, Clone)]
pub struct UpdateLabelsCommand {
    name: String,
    add: BTreeMap<String, String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl UpdateLabelsCommand {
    /// Create a new label update command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            add: BTreeMap::new(),
            executor,
        }
    }

    /// Add a label to apply
    #[must_use]
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl DockerCommand for UpdateLabelsCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["container".to_string(), "update".to_string()];
        for (key, value) in &self.add {
            args.push("--label-add".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.name.clone());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        if self.add.is_empty() {
            return Err(Error::invalid_input(
                format!("docker.container.update[{}]", self.name),
                "no labels to add",
            ));
        }
        self.execute_command().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ps_args() {
        let cmd = PsCommand::new(CommandExecutor::new())
            .all()
            .filter("label=com.docker.compose.project=web");
        assert_eq!(
            cmd.build_command_args(),
            vec![
                "ps",
                "--all",
                "--filter",
                "label=com.docker.compose.project=web",
                "--format",
                "{{json .}}",
            ]
        );
    }

    #[test]
    fn test_container_summary_labels() {
        let raw = r#"{"ID":"abc","Names":"web-1","Image":"nginx","State":"running","Labels":"com.docker.compose.service=web,com.docker.compose.config-hash=deadbeef"}"#;
        let summary: ContainerSummary = serde_json::from_str(raw).unwrap();
        assert!(summary.is_running());
        assert_eq!(summary.compose_service().as_deref(), Some("web"));
        assert_eq!(summary.config_hash().as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_lifecycle_args() {
        let executor = CommandExecutor::new();
        let stop = LifecycleCommand::new(LifecycleVerb::Stop, "web-1", executor.clone());
        assert_eq!(stop.build_command_args(), vec!["container", "stop", "web-1"]);
        let restart = LifecycleCommand::new(LifecycleVerb::Restart, "web-1", executor);
        assert_eq!(
            restart.build_command_args(),
            vec!["container", "restart", "web-1"]
        );
    }

    #[test]
    fn test_rm_force_args() {
        let cmd = ContainerRmCommand::new("web-1", CommandExecutor::new()).force();
        assert_eq!(
            cmd.build_command_args(),
            vec!["container", "rm", "--force", "web-1"]
        );
    }

    #[test]
    fn test_update_labels_args() {
        let cmd = UpdateLabelsCommand::new("web-1", CommandExecutor::new())
            .add("io.dockform.identifier", "demo");
        assert_eq!(
            cmd.build_command_args(),
            vec![
                "container",
                "update",
                "--label-add",
                "io.dockform.identifier=demo",
                "web-1",
            ]
        );
    }

    #[test]
    fn test_labels_match_identifier() {
        let mut labels = BTreeMap::new();
        labels.insert("io.dockform.identifier".to_string(), "demo".to_string());
        assert!(labels_match_identifier(&labels, "demo"));
        assert!(!labels_match_identifier(&labels, "other"));

        let mut legacy = BTreeMap::new();
        legacy.insert("io.dockform/demo".to_string(), "1".to_string());
        assert!(labels_match_identifier(&legacy, "demo"));
        legacy.insert("io.dockform/demo".to_string(), "0".to_string());
        assert!(!labels_match_identifier(&legacy, "demo"));
    }

    #[test]
    fn test_inspect_labels_args() {
        let cmd = InspectLabelsCommand::new("web-1", CommandExecutor::new());
        assert_eq!(
            cmd.build_command_args(),
            vec!["inspect", "--format", "{{json .Config.Labels}}", "web-1"]
        );
    }
}
