//! Docker volume commands.

use crate::command::{CommandExecutor, CommandOutput, DockerCommand};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Docker volume create command
#[derive(Debug, Clone)]
pub struct VolumeCreateCommand {
    name: String,
    driver: Option<String>,
    driver_opts: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl VolumeCreateCommand {
    /// Create a new volume create command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            driver: None,
            driver_opts: BTreeMap::new(),
            labels: BTreeMap::new(),
            executor,
        }
    }

    /// Set the volume driver
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Add a driver option
    #[must_use]
    pub fn driver_opt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_opts.insert(key.into(), value.into());
        self
    }

    /// Add a label
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add multiple labels
    #[must_use]
    pub fn labels<I>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.labels.extend(labels);
        self
    }
}

#[async_trait]
impl DockerCommand for VolumeCreateCommand {
    type Output = String;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["volume".to_string(), "create".to_string()];

        if let Some(ref driver) = self.driver {
            args.push("--driver".to_string());
            args.push(driver.clone());
        }

        for (key, value) in &self.driver_opts {
            args.push("--opt".to_string());
            args.push(format!("{key}={value}"));
        }

        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.name.clone());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        let output = self.execute_command().await?;
        Ok(output.stdout.trim().to_string())
    }
}

/// Docker volume ls command
#[derive(Debug, Clone)]
pub struct VolumeLsCommand {
    filters: Vec<String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl VolumeLsCommand {
    /// Create a new volume ls command
    #[must_use]
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            filters: Vec::new(),
            executor,
        }
    }

    /// Add a `--filter key=value` pair
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

#[async_trait]
impl DockerCommand for VolumeLsCommand {
    type Output = Vec<VolumeSummary>;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["volume".to_string(), "ls".to_string()];
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
        parse_json_lines(&output, "docker.volume.ls")
    }
}

/// One line of `docker volume ls --format '{{json .}}'`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSummary {
    /// Volume name
    #[serde(rename = "Name")]
    pub name: String,
    /// Volume driver
    #[serde(rename = "Driver")]
    pub driver: String,
    /// Comma-joined `key=value` labels as docker prints them
    #[serde(rename = "Labels", default)]
    pub labels: String,
}

impl VolumeSummary {
    /// Parse the comma-joined label string into a map
    #[must_use]
    pub fn label_map(&self) -> BTreeMap<String, String> {
        parse_label_string(&self.labels)
    }
}

/// Docker volume inspect command
#[derive(Debug, Clone)]
pub struct VolumeInspectCommand {
    name: String,
    /// Command executor
    pub executor: CommandExecutor,
}

impl VolumeInspectCommand {
    /// Create a new volume inspect command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }
}

#[async_trait]
impl DockerCommand for VolumeInspectCommand {
    type Output = VolumeDetails;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        vec![
            "volume".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            self.name.clone(),
        ]
    }

    async fn execute(&self) -> Result<Self::Output> {
        let output = self.execute_command().await?;
        serde_json::from_str(output.stdout.trim()).map_err(|e| {
            Error::internal(
                format!("docker.volume.inspect[{}]", self.name),
                format!("unparseable inspect output: {e}"),
            )
            .with_source(e)
        })
    }
}

/// Inspected volume configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeDetails {
    /// Volume name
    #[serde(rename = "Name")]
    pub name: String,
    /// Volume driver
    #[serde(rename = "Driver")]
    pub driver: String,
    /// Host mountpoint
    #[serde(rename = "Mountpoint", default)]
    pub mountpoint: String,
    /// Driver options
    #[serde(rename = "Options", default, deserialize_with = "nullable_map")]
    pub options: BTreeMap<String, String>,
    /// Labels
    #[serde(rename = "Labels", default, deserialize_with = "nullable_map")]
    pub labels: BTreeMap<String, String>,
}

/// Docker volume rm command
#[derive(Debug, Clone)]
pub struct VolumeRmCommand {
    name: String,
    force: bool,
    /// Command executor
    pub executor: CommandExecutor,
}

impl VolumeRmCommand {
    /// Create a new volume rm command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            force: false,
            executor,
        }
    }

    /// Force removal
    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

#[async_trait]
impl DockerCommand for VolumeRmCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["volume".to_string(), "rm".to_string()];
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

/// Deserialize a map field that docker renders as `null` when empty
pub(crate) fn nullable_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<BTreeMap<String, String>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// Parse docker's comma-joined `key=value` label rendering
pub(crate) fn parse_label_string(labels: &str) -> BTreeMap<String, String> {
    labels
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse newline-delimited `{{json .}}` output into typed rows
pub(crate) fn parse_json_lines<T: serde::de::DeserializeOwned>(
    output: &CommandOutput,
    op: &str,
) -> Result<Vec<T>> {
    output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                Error::internal(op.to_string(), format!("unparseable json line: {e}")).with_source(e)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_create_args() {
        let cmd = VolumeCreateCommand::new("data", CommandExecutor::new())
            .driver("local")
            .driver_opt("type", "tmpfs")
            .label("io.dockform.identifier", "demo");
        assert_eq!(
            cmd.build_command_args(),
            vec![
                "volume",
                "create",
                "--driver",
                "local",
                "--opt",
                "type=tmpfs",
                "--label",
                "io.dockform.identifier=demo",
                "data",
            ]
        );
    }

    #[test]
    fn test_volume_create_args_sorted_labels() {
        let cmd = VolumeCreateCommand::new("data", CommandExecutor::new())
            .label("b", "2")
            .label("a", "1");
        let args = cmd.build_command_args();
        let a = args.iter().position(|s| s == "a=1").unwrap();
        let b = args.iter().position(|s| s == "b=2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_volume_ls_args() {
        let cmd = VolumeLsCommand::new(CommandExecutor::new())
            .filter("label=io.dockform.identifier=demo");
        assert_eq!(
            cmd.build_command_args(),
            vec![
                "volume",
                "ls",
                "--filter",
                "label=io.dockform.identifier=demo",
                "--format",
                "{{json .}}",
            ]
        );
    }

    #[test]
    fn test_volume_rm_force() {
        let cmd = VolumeRmCommand::new("data", CommandExecutor::new()).force();
        assert_eq!(cmd.build_command_args(), vec!["volume", "rm", "--force", "data"]);
    }

    #[test]
    fn test_inspect_parsing_with_null_maps() {
        let raw = r#"{"Name":"data","Driver":"local","Mountpoint":"/var/lib/docker/volumes/data/_data","Options":null,"Labels":{"io.dockform.identifier":"demo"}}"#;
        let details: VolumeDetails = serde_json::from_str(raw).unwrap();
        assert_eq!(details.driver, "local");
        assert!(details.options.is_empty());
        assert_eq!(
            details.labels.get("io.dockform.identifier").map(String::as_str),
            Some("demo")
        );
    }

    #[test]
    fn test_label_string_parsing() {
        let labels = parse_label_string("a=1,io.dockform.identifier=demo");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("a").map(String::as_str), Some("1"));
        assert!(parse_label_string("").is_empty());
    }
}
