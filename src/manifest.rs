//! The declarative manifest model.
//!
//! A manifest names the project identifier, daemon contexts, stacks,
//! top-level volumes and networks, and filesets. [`loader`] parses and
//! validates the YAML form; after loading the model is frozen and shared
//! by reference between the planner and applier.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub mod interpolate;
pub mod loader;

pub use loader::{load, load_str, LoadOptions};

/// Root of the declarative input
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Ownership scope; stamped onto every managed resource
    pub project_identifier: String,
    /// Daemon connection settings by context name
    #[serde(default)]
    pub contexts: BTreeMap<String, DockerContext>,
    /// Stacks by name
    #[serde(default)]
    pub stacks: BTreeMap<String, Stack>,
    /// Top-level volumes by name
    #[serde(default)]
    pub volumes: BTreeMap<String, TopLevelResource>,
    /// Top-level networks by name
    #[serde(default)]
    pub networks: BTreeMap<String, TopLevelResource>,
    /// Filesets by name
    #[serde(default)]
    pub filesets: BTreeMap<String, Fileset>,
    /// Directory the manifest was loaded from; all relative paths resolve
    /// against it
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Manifest {
    /// Volumes the tool must ensure exist: declared volumes plus every
    /// fileset target
    #[must_use]
    pub fn desired_volume_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.volumes.keys().cloned().collect();
        names.extend(self.filesets.values().map(|f| f.target_volume.clone()));
        names
    }

    /// The effective compose project name of a stack.
    ///
    /// `project_name` defaults to the stack key during loading; the key
    /// is the fallback for models built in tests.
    #[must_use]
    pub fn stack_project_name(&self, stack_name: &str) -> String {
        self.stacks
            .get(stack_name)
            .and_then(|s| s.project_name.clone())
            .unwrap_or_else(|| stack_name.to_string())
    }
}

/// Daemon connection settings for one context
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerContext {
    /// Daemon host URI override (e.g. `ssh://deploy@host`)
    #[serde(default)]
    pub host: Option<String>,
}

/// One compose project under management
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stack {
    /// Stack directory, relative to the manifest base
    pub root: PathBuf,
    /// Compose files relative to `root`; discovered by convention when empty
    #[serde(default)]
    pub compose_files: Vec<PathBuf>,
    /// Compose profiles to enable
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Env files, resolved relative to `root` then the manifest base
    #[serde(default)]
    pub env_files: Vec<PathBuf>,
    /// Inline `KEY=VALUE` environment entries
    #[serde(default)]
    pub env_inline: Vec<String>,
    /// Compose project name; defaults to the stack key
    #[serde(default)]
    pub project_name: Option<String>,
    /// Daemon context this stack targets; absent uses the default
    #[serde(default)]
    pub context: Option<String>,
}

impl Stack {
    /// Parsed inline environment pairs
    #[must_use]
    pub fn inline_env_pairs(&self) -> Vec<(String, String)> {
        self.env_inline
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect()
    }
}

/// A top-level volume or network declaration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopLevelResource {
    /// Driver name
    #[serde(default)]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Labels beyond the identifier label
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Pre-existing resource: verified but never created or removed
    #[serde(default)]
    pub external: bool,
    /// Volumes only: allow destructive migration on spec drift
    #[serde(default)]
    pub migrate: bool,
    /// Networks only: IPAM subnet
    #[serde(default)]
    pub subnet: Option<String>,
    /// Networks only: IPAM gateway
    #[serde(default)]
    pub gateway: Option<String>,
    /// Networks only: IPAM allocation range
    #[serde(default)]
    pub ip_range: Option<String>,
    /// Networks only: IPAM auxiliary addresses
    #[serde(default)]
    pub aux_addresses: BTreeMap<String, String>,
    /// Networks only: allow manual attachment
    #[serde(default)]
    pub attachable: bool,
    /// Networks only: restrict external access
    #[serde(default)]
    pub internal: bool,
    /// Networks only: enable IPv6
    #[serde(default)]
    pub ipv6: bool,
}

/// A local directory synchronized into a volume
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fileset {
    /// Local source directory, relative to the manifest base
    pub source: PathBuf,
    /// Name of the target volume (managed or external)
    pub target_volume: String,
    /// Absolute path inside the volume
    pub target_path: String,
    /// Gitignore-like exclude patterns; normalized at load
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Ownership and mode policy for synchronized files
    #[serde(default)]
    pub ownership: Ownership,
    /// Services to bounce when content changes
    #[serde(default)]
    pub restart_services: Vec<ServiceRef>,
}

/// Ownership and mode policy for a fileset
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ownership {
    /// Owner: numeric id or name, resolved inside the helper container
    #[serde(default)]
    pub user: Option<String>,
    /// Group: numeric id or name
    #[serde(default)]
    pub group: Option<String>,
    /// Octal mode for files
    #[serde(default)]
    pub file_mode: Option<String>,
    /// Octal mode for directories
    #[serde(default)]
    pub dir_mode: Option<String>,
    /// Apply policy only to created and updated files
    #[serde(default)]
    pub preserve_existing: bool,
}

impl Ownership {
    /// Whether any ownership or mode setting is present
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.user.is_some()
            || self.group.is_some()
            || self.file_mode.is_some()
            || self.dir_mode.is_some()
    }
}

/// A `stack/service` reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceRef {
    /// Stack key in the manifest
    pub stack: String,
    /// Service name within the stack
    pub service: String,
}

impl TryFrom<String> for ServiceRef {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let (stack, service) = value
            .split_once('/')
            .ok_or_else(|| format!("expected stack/service, got {value:?}"))?;
        if stack.is_empty() || service.is_empty() {
            return Err(format!("expected stack/service, got {value:?}"));
        }
        Ok(Self {
            stack: stack.to_string(),
            service: service.to_string(),
        })
    }
}

impl From<ServiceRef> for String {
    fn from(value: ServiceRef) -> Self {
        format!("{}/{}", value.stack, value.service)
    }
}

impl std::fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stack, self.service)
    }
}

/// Whether a name is usable as an identifier, stack or fileset key
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("my-app.prod_1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("a/b"));
    }

    #[test]
    fn test_service_ref_parsing() {
        let parsed = ServiceRef::try_from("web/app".to_string()).unwrap();
        assert_eq!(parsed.stack, "web");
        assert_eq!(parsed.service, "app");
        assert_eq!(parsed.to_string(), "web/app");
        assert!(ServiceRef::try_from("web".to_string()).is_err());
        assert!(ServiceRef::try_from("/app".to_string()).is_err());
    }

    #[test]
    fn test_desired_volume_names_unions_filesets() {
        let mut manifest = Manifest {
            project_identifier: "demo".to_string(),
            ..Manifest::default()
        };
        manifest
            .volumes
            .insert("data".to_string(), TopLevelResource::default());
        manifest.filesets.insert(
            "conf".to_string(),
            Fileset {
                source: PathBuf::from("conf"),
                target_volume: "app-config".to_string(),
                target_path: "/config".to_string(),
                ..Fileset::default()
            },
        );
        let names = manifest.desired_volume_names();
        assert!(names.contains("data"));
        assert!(names.contains("app-config"));
    }

    #[test]
    fn test_inline_env_pairs() {
        let stack = Stack {
            env_inline: vec!["A=1".to_string(), "bad".to_string(), "B=x=y".to_string()],
            ..Stack::default()
        };
        let pairs = stack.inline_env_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("B".to_string(), "x=y".to_string()));
    }
}
