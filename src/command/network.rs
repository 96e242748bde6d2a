//! Docker network commands.

use crate::command::volume::{nullable_map, parse_json_lines};
use crate::command::{CommandExecutor, CommandOutput, DockerCommand};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Docker network create command
#[derive(Debug, Clone)]
pub struct NetworkCreateCommand {
    name: String,
    driver: Option<String>,
    options: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    subnet: Option<String>,
    gateway: Option<String>,
    ip_range: Option<String>,
    aux_addresses: BTreeMap<String, String>,
    attachable: bool,
    internal: bool,
    ipv6: bool,
    /// Command executor
    pub executor: CommandExecutor,
}

impl NetworkCreateCommand {
    /// Create a new network create command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            driver: None,
            options: BTreeMap::new(),
            labels: BTreeMap::new(),
            subnet: None,
            gateway: None,
            ip_range: None,
            aux_addresses: BTreeMap::new(),
            attachable: false,
            internal: false,
            ipv6: false,
            executor,
        }
    }

    /// Set the network driver
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Add a driver option
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
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

    /// Set the IPAM subnet
    #[must_use]
    pub fn subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = Some(subnet.into());
        self
    }

    /// Set the IPAM gateway
    #[must_use]
    pub fn gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    /// Set the IPAM allocation range
    #[must_use]
    pub fn ip_range(mut self, range: impl Into<String>) -> Self {
        self.ip_range = Some(range.into());
        self
    }

    /// Add an IPAM auxiliary address
    #[must_use]
    pub fn aux_address(mut self, host: impl Into<String>, address: impl Into<String>) -> Self {
        self.aux_addresses.insert(host.into(), address.into());
        self
    }

    /// Allow manual container attachment
    #[must_use]
    pub fn attachable(mut self) -> Self {
        self.attachable = true;
        self
    }

    /// Restrict external access
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Enable IPv6
    #[must_use]
    pub fn ipv6(mut self) -> Self {
        self.ipv6 = true;
        self
    }
}

#[async_trait]
impl DockerCommand for NetworkCreateCommand {
    type Output = String;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["network".to_string(), "create".to_string()];

        if let Some(ref driver) = self.driver {
            args.push("--driver".to_string());
            args.push(driver.clone());
        }
        for (key, value) in &self.options {
            args.push("--opt".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(ref subnet) = self.subnet {
            args.push("--subnet".to_string());
            args.push(subnet.clone());
        }
        if let Some(ref gateway) = self.gateway {
            args.push("--gateway".to_string());
            args.push(gateway.clone());
        }
        if let Some(ref range) = self.ip_range {
            args.push("--ip-range".to_string());
            args.push(range.clone());
        }
        for (host, address) in &self.aux_addresses {
            args.push("--aux-address".to_string());
            args.push(format!("{host}={address}"));
        }
        if self.attachable {
            args.push("--attachable".to_string());
        }
        if self.internal {
            args.push("--internal".to_string());
        }
        if self.ipv6 {
            args.push("--ipv6".to_string());
        }

        args.push(self.name.clone());
        args
    }

    async fn execute(&self) -> Result<Self::Output> {
        let output = self.execute_command().await?;
        Ok(output.stdout.trim().to_string())
    }
}

/// Docker network ls command
#[derive(Debug, Clone)]
pub struct NetworkLsCommand {
    filters: Vec<String>,
    /// Command executor
    pub executor: CommandExecutor,
}

impl NetworkLsCommand {
    /// Create a new network ls command
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
impl DockerCommand for NetworkLsCommand {
    type Output = Vec<NetworkSummary>;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["network".to_string(), "ls".to_string()];
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
        parse_json_lines(&output, "docker.network.ls")
    }
}

/// One line of `docker network ls --format '{{json .}}'`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSummary {
    /// Network name
    #[serde(rename = "Name")]
    pub name: String,
    /// Network driver
    #[serde(rename = "Driver")]
    pub driver: String,
    /// Comma-joined `key=value` labels
    #[serde(rename = "Labels", default)]
    pub labels: String,
}

/// Docker network inspect command
#[derive(Debug, Clone)]
pub struct NetworkInspectCommand {
    name: String,
    /// Command executor
    pub executor: CommandExecutor,
}

impl NetworkInspectCommand {
    /// Create a new network inspect command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }
}

#[async_trait]
impl DockerCommand for NetworkInspectCommand {
    type Output = NetworkDetails;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        vec![
            "network".to_string(),
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
                format!("docker.network.inspect[{}]", self.name),
                format!("unparseable inspect output: {e}"),
            )
            .with_source(e)
        })
    }
}

/// Inspected network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDetails {
    /// Network name
    #[serde(rename = "Name")]
    pub name: String,
    /// Network driver
    #[serde(rename = "Driver")]
    pub driver: String,
    /// IPv6 enabled
    #[serde(rename = "EnableIPv6", default)]
    pub ipv6: bool,
    /// Internal network
    #[serde(rename = "Internal", default)]
    pub internal: bool,
    /// Manual attachment allowed
    #[serde(rename = "Attachable", default)]
    pub attachable: bool,
    /// IPAM configuration
    #[serde(rename = "IPAM", default)]
    pub ipam: NetworkIpam,
    /// Driver options
    #[serde(rename = "Options", default, deserialize_with = "nullable_map")]
    pub options: BTreeMap<String, String>,
    /// Labels
    #[serde(rename = "Labels", default, deserialize_with = "nullable_map")]
    pub labels: BTreeMap<String, String>,
    /// Connected containers keyed by id
    #[serde(rename = "Containers", default)]
    pub containers: BTreeMap<String, NetworkContainer>,
}

impl NetworkDetails {
    /// Names of the containers connected to this network
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }
}

/// IPAM block of a network inspect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkIpam {
    /// IPAM driver
    #[serde(rename = "Driver", default)]
    pub driver: String,
    /// IPAM pool configuration entries
    #[serde(rename = "Config", default, deserialize_with = "nullable_vec")]
    pub config: Vec<IpamConfig>,
}

/// One IPAM pool entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Pool subnet in CIDR form
    #[serde(rename = "Subnet", default)]
    pub subnet: Option<String>,
    /// Pool gateway
    #[serde(rename = "Gateway", default)]
    pub gateway: Option<String>,
    /// Allocation range inside the subnet
    #[serde(rename = "IPRange", default)]
    pub ip_range: Option<String>,
    /// Auxiliary addresses reserved from the pool
    #[serde(rename = "AuxiliaryAddresses", default, deserialize_with = "nullable_map")]
    pub aux_addresses: BTreeMap<String, String>,
}

/// A container entry in a network inspect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkContainer {
    /// Container name
    #[serde(rename = "Name")]
    pub name: String,
}

/// Docker network rm command
#[derive(Debug, Clone)]
pub struct NetworkRmCommand {
    name: String,
    /// Command executor
    pub executor: CommandExecutor,
}

impl NetworkRmCommand {
    /// Create a new network rm command
    #[must_use]
    pub fn new(name: impl Into<String>, executor: CommandExecutor) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }
}

#[async_trait]
impl DockerCommand for NetworkRmCommand {
    type Output = CommandOutput;

    fn get_executor(&self) -> &CommandExecutor {
        &self.executor
    }

    fn build_command_args(&self) -> Vec<String> {
        vec!["network".to_string(), "rm".to_string(), self.name.clone()]
    }

    async fn execute(&self) -> Result<Self::Output> {
        self.execute_command().await
    }
}

/// Deserialize a list field that docker renders as `null` when empty
fn nullable_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_create_args_full() {
        let cmd = NetworkCreateCommand::new("frontend", CommandExecutor::new())
            .driver("bridge")
            .option("com.docker.network.bridge.name", "df0")
            .label("io.dockform.identifier", "demo")
            .subnet("10.20.0.0/16")
            .gateway("10.20.0.1")
            .ip_range("10.20.1.0/24")
            .aux_address("router", "10.20.0.254")
            .attachable()
            .internal()
            .ipv6();
        let args = cmd.build_command_args();
        assert_eq!(args[..2], ["network".to_string(), "create".to_string()]);
        assert!(args.contains(&"--subnet".to_string()));
        assert!(args.contains(&"10.20.0.0/16".to_string()));
        assert!(args.contains(&"--aux-address".to_string()));
        assert!(args.contains(&"router=10.20.0.254".to_string()));
        assert!(args.contains(&"--attachable".to_string()));
        assert!(args.contains(&"--internal".to_string()));
        assert!(args.contains(&"--ipv6".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("frontend"));
    }

    #[test]
    fn test_network_inspect_parsing() {
        let raw = r#"{
            "Name": "frontend",
            "Driver": "bridge",
            "EnableIPv6": false,
            "Internal": false,
            "Attachable": true,
            "IPAM": {
                "Driver": "default",
                "Config": [{"Subnet": "10.20.0.0/16", "Gateway": "10.20.0.1"}]
            },
            "Options": {},
            "Labels": {"io.dockform.identifier": "demo"},
            "Containers": {
                "abc123": {"Name": "web-1"},
                "def456": {"Name": "api-1"}
            }
        }"#;
        let details: NetworkDetails = serde_json::from_str(raw).unwrap();
        assert!(details.attachable);
        assert_eq!(
            details.ipam.config[0].subnet.as_deref(),
            Some("10.20.0.0/16")
        );
        assert_eq!(details.container_names(), vec!["api-1", "web-1"]);
    }

    #[test]
    fn test_network_inspect_null_ipam_config() {
        let raw = r#"{"Name":"n","Driver":"bridge","IPAM":{"Driver":"default","Config":null}}"#;
        let details: NetworkDetails = serde_json::from_str(raw).unwrap();
        assert!(details.ipam.config.is_empty());
    }

    #[test]
    fn test_network_rm_args() {
        let cmd = NetworkRmCommand::new("frontend", CommandExecutor::new());
        assert_eq!(cmd.build_command_args(), vec!["network", "rm", "frontend"]);
    }
}
