//! Docker Compose command plumbing and the resolved document model.
//!
//! A [`ComposeProject`] captures everything that scopes a compose
//! invocation: working directory, file list, project name, profiles,
//! env files and inline environment. Commands in the submodules combine
//! it with their own flags; the planner keys its document cache on the
//! same tuple via [`ComposeProject::cache_key`].

use crate::command::{CommandExecutor, CommandOutput};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

pub mod config;
pub mod ps;
pub mod up;

/// Options shared by every compose invocation for one stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeProject {
    /// Working directory the child runs in
    pub workdir: PathBuf,
    /// Compose file paths, in precedence order
    pub files: Vec<PathBuf>,
    /// Project name (`-p`)
    pub project_name: Option<String>,
    /// Profiles to enable
    pub profiles: Vec<String>,
    /// Env files (`--env-file`)
    pub env_files: Vec<PathBuf>,
    /// Inline environment, injected into the child only when non-empty
    pub inline_env: Vec<(String, String)>,
}

impl ComposeProject {
    /// Create a project rooted at the given working directory
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Self::default()
        }
    }

    /// Add a compose file
    #[must_use]
    pub fn file(mut self, file: impl Into<PathBuf>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Replace the compose file list
    #[must_use]
    pub fn files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Set the project name
    #[must_use]
    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Add a profile
    #[must_use]
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    /// Add an env file
    #[must_use]
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_files.push(path.into());
        self
    }

    /// Add one inline environment variable
    #[must_use]
    pub fn inline(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inline_env.push((key.into(), value.into()));
        self
    }

    /// Global compose arguments, before the subcommand
    #[must_use]
    pub fn build_global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for file in &self.files {
            args.push("--file".to_string());
            args.push(file.to_string_lossy().to_string());
        }
        if let Some(ref name) = self.project_name {
            args.push("--project-name".to_string());
            args.push(name.clone());
        }
        for profile in &self.profiles {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        for env_file in &self.env_files {
            args.push("--env-file".to_string());
            args.push(env_file.to_string_lossy().to_string());
        }
        args
    }

    /// Deterministic cache key for resolved documents.
    ///
    /// The key covers every input that can change the resolved document;
    /// the planner must observe the same document across repeated
    /// `config` calls for one run.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = clean_path(&self.workdir).to_string_lossy().to_string();
        for file in &self.files {
            key.push('\u{1f}');
            key.push_str(&file.to_string_lossy());
        }
        key.push('\u{1e}');
        for profile in &self.profiles {
            key.push('\u{1f}');
            key.push_str(profile);
        }
        key.push('\u{1e}');
        for env_file in &self.env_files {
            key.push('\u{1f}');
            key.push_str(&env_file.to_string_lossy());
        }
        key.push('\u{1e}');
        for (name, value) in &self.inline_env {
            key.push('\u{1f}');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        if let Some(ref name) = self.project_name {
            key.push('\u{1e}');
            key.push_str(name);
        }
        key
    }

    /// An executor configured for this project: working directory plus
    /// inline environment (only when non-empty)
    #[must_use]
    pub fn configure(&self, executor: &CommandExecutor) -> CommandExecutor {
        let mut executor = executor.clone().workdir(&self.workdir);
        if !self.inline_env.is_empty() {
            executor = executor.envs(self.inline_env.iter().cloned());
        }
        executor
    }
}

/// Lexically normalize a path: strip `.` segments and fold `..`
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Extended trait for compose subcommands
#[async_trait]
pub trait ComposeCommand {
    /// The output type this command produces
    type Output;

    /// Get the command executor
    fn get_executor(&self) -> &CommandExecutor;

    /// Get the project options
    fn get_project(&self) -> &ComposeProject;

    /// The compose subcommand name (e.g. `up`, `config`)
    fn subcommand(&self) -> &'static str;

    /// Command-specific arguments, after the subcommand
    fn build_subcommand_args(&self) -> Vec<String>;

    /// Complete argv: `compose` + global args + subcommand + its args
    fn build_command_args(&self) -> Vec<String> {
        let mut args = vec!["compose".to_string()];
        args.extend(self.get_project().build_global_args());
        args.push(self.subcommand().to_string());
        args.extend(self.build_subcommand_args());
        args
    }

    /// Execute the command and return the typed output
    async fn execute(&self) -> Result<Self::Output>;

    /// Run the built argv with the project's working directory and env
    async fn execute_compose(&self) -> Result<CommandOutput> {
        let args = self.build_command_args();
        let executor = self.get_project().configure(self.get_executor());
        executor.execute(&args).await
    }
}

/// Labels as compose accepts them: mapping or `KEY=VALUE` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComposeLabels {
    /// Mapping form
    Map(BTreeMap<String, String>),
    /// List form (`KEY=VALUE` entries)
    List(Vec<String>),
}

impl ComposeLabels {
    /// View as a map, parsing the list form
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map.clone(),
            Self::List(list) => list
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (entry.clone(), String::new()),
                })
                .collect(),
        }
    }
}

/// Service networks: mapping (resolved form) or plain list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComposeNetworks {
    /// Mapping form, values carry per-network settings
    Map(BTreeMap<String, serde_json::Value>),
    /// List form
    List(Vec<String>),
}

impl ComposeNetworks {
    /// The set of attached network keys
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        match self {
            Self::Map(map) => map.keys().cloned().collect(),
            Self::List(list) => list.iter().cloned().collect(),
        }
    }
}

/// One service of a resolved compose document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    /// Image reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Explicit container name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Service labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<ComposeLabels>,
    /// Attached networks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networks: Option<ComposeNetworks>,
    /// Volume mounts (short strings or resolved long form)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<serde_json::Value>>,
    /// Everything else, preserved verbatim for re-serialization
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ComposeService {
    /// Ensure the labels mapping contains the given pair
    pub fn ensure_label(&mut self, key: &str, value: &str) {
        let mut map = self.labels.as_ref().map(ComposeLabels::to_map).unwrap_or_default();
        map.insert(key.to_string(), value.to_string());
        self.labels = Some(ComposeLabels::Map(map));
    }

    /// Names of networks this service attaches to
    #[must_use]
    pub fn network_names(&self) -> BTreeSet<String> {
        self.networks.as_ref().map(ComposeNetworks::names).unwrap_or_default()
    }

    /// Named volumes this service mounts (bind mounts are skipped)
    #[must_use]
    pub fn named_volumes(&self) -> BTreeSet<String> {
        let Some(ref volumes) = self.volumes else {
            return BTreeSet::new();
        };
        let mut names = BTreeSet::new();
        for mount in volumes {
            match mount {
                serde_json::Value::String(short) => {
                    // Short syntax: `source:target[:mode]`; a source with a
                    // path separator is a bind mount.
                    if let Some((source, _)) = short.split_once(':') {
                        if !source.is_empty() && !source.contains('/') && !source.contains('\\') {
                            names.insert(source.to_string());
                        }
                    }
                }
                serde_json::Value::Object(long) => {
                    let is_volume = long
                        .get("type")
                        .and_then(serde_json::Value::as_str)
                        .is_none_or(|t| t == "volume");
                    if is_volume {
                        if let Some(source) = long.get("source").and_then(serde_json::Value::as_str)
                        {
                            names.insert(source.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        names
    }
}

/// A resolved compose document, as produced by `compose config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeDocument {
    /// Project name compose resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services keyed by name
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
    /// Everything else (top-level volumes, networks, configs, …)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ComposeDocument {
    /// Sorted service names
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Serialize back to YAML for use as a compose file
    ///
    /// # Errors
    ///
    /// Returns `Internal` when serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args() {
        let project = ComposeProject::new("/srv/web")
            .file("compose.yaml")
            .project_name("web")
            .profile("prod")
            .env_file(".env");
        assert_eq!(
            project.build_global_args(),
            vec![
                "--file",
                "compose.yaml",
                "--project-name",
                "web",
                "--profile",
                "prod",
                "--env-file",
                ".env",
            ]
        );
    }

    #[test]
    fn test_cache_key_distinguishes_profiles_from_files() {
        let base = ComposeProject::new("/srv/web");
        let with_file = base.clone().file("a");
        let with_profile = base.clone().profile("a");
        assert_ne!(with_file.cache_key(), with_profile.cache_key());
    }

    #[test]
    fn test_cache_key_cleans_workdir() {
        let one = ComposeProject::new("/srv/./web");
        let two = ComposeProject::new("/srv/web");
        assert_eq!(one.cache_key(), two.cache_key());
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("./x")), PathBuf::from("x"));
        assert_eq!(clean_path(Path::new(".")), PathBuf::from("."));
    }

    #[test]
    fn test_labels_list_to_map() {
        let labels = ComposeLabels::List(vec!["a=1".to_string(), "flag".to_string()]);
        let map = labels.to_map();
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_ensure_label_converts_list_form() {
        let mut service = ComposeService {
            labels: Some(ComposeLabels::List(vec!["a=1".to_string()])),
            ..ComposeService::default()
        };
        service.ensure_label("io.dockform.identifier", "demo");
        let Some(ComposeLabels::Map(map)) = service.labels else {
            panic!("labels not in map form");
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("io.dockform.identifier").map(String::as_str), Some("demo"));
    }

    #[test]
    fn test_named_volumes_skips_binds() {
        let raw = serde_json::json!({
            "image": "nginx",
            "volumes": [
                "data:/var/lib/data",
                "./conf:/etc/nginx:ro",
                {"type": "volume", "source": "cache", "target": "/cache"},
                {"type": "bind", "source": "/host", "target": "/mnt"}
            ]
        });
        let service: ComposeService = serde_json::from_value(raw).unwrap();
        let names = service.named_volumes();
        assert!(names.contains("data"));
        assert!(names.contains("cache"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_document_roundtrip_preserves_extra() {
        let raw = serde_json::json!({
            "name": "web",
            "services": {"app": {"image": "nginx", "init": true}},
            "volumes": {"data": null}
        });
        let doc: ComposeDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.service_names(), vec!["app"]);
        assert!(doc.extra.contains_key("volumes"));
        let app = &doc.services["app"];
        assert!(app.extra.contains_key("init"));
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("image: nginx"));
    }
}
