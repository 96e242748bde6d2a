//! Docker client façade.
//!
//! [`DockerClient`] is the only way the rest of the crate talks to the
//! daemon. It owns the executor configuration (context, timeouts,
//! cancellation), scopes list operations to the project identifier, and
//! keeps the LRU cache of resolved compose documents that the planner
//! relies on for a stable view within one run.

use crate::command::container::{
    ContainerRmCommand, ContainerSummary, InspectLabelsCommand, LifecycleCommand, LifecycleVerb,
    PsCommand, UpdateLabelsCommand,
};
use crate::command::logs::LogsCommand;
use crate::command::network::{
    NetworkCreateCommand, NetworkDetails, NetworkInspectCommand, NetworkLsCommand,
    NetworkRmCommand, NetworkSummary,
};
use crate::command::run::RunCommand;
use crate::command::volume::{
    VolumeCreateCommand, VolumeDetails, VolumeInspectCommand, VolumeLsCommand, VolumeRmCommand,
    VolumeSummary,
};
use crate::command::{CommandExecutor, DockerCommand};
use crate::compose::config::{ComposeConfigCommand, ConfigFormat};
use crate::compose::ps::{ComposeContainer, ComposePsCommand};
use crate::compose::up::ComposeUpCommand;
use crate::compose::{ComposeCommand, ComposeDocument, ComposeProject};
use crate::error::{Error, Kind, Result};
use lru::LruCache;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Mount point for helper containers; volume paths are joined below it
const HELPER_MOUNT: &str = "/target";

/// Shell fragment that makes `zstd` available inside the helper
const ZSTD_GUARD: &str = "command -v zstd >/dev/null 2>&1 || apk add --no-cache zstd >/dev/null";

/// Docker client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Docker context name; `None` uses the daemon default
    pub context: Option<String>,
    /// Project identifier used to scope list operations
    pub identifier: Option<String>,
    /// Image used for helper containers
    pub helper_image: String,
    /// Capacity of the resolved compose document cache
    pub compose_cache_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            context: None,
            identifier: None,
            helper_image: crate::HELPER_IMAGE.to_string(),
            compose_cache_capacity: crate::COMPOSE_CACHE_CAPACITY,
        }
    }
}

type ComposeCache = RwLock<LruCache<String, Arc<ComposeDocument>>>;

/// Typed façade over the docker CLI
#[derive(Clone)]
pub struct DockerClient {
    executor: CommandExecutor,
    config: ClientConfig,
    compose_cache: Arc<ComposeCache>,
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DockerClient {
    /// Create a client with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with the given configuration
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        let mut executor = CommandExecutor::new();
        if let Some(ref context) = config.context {
            executor = executor.context(context.clone());
        }
        let capacity =
            NonZeroUsize::new(config.compose_cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            executor,
            config,
            compose_cache: Arc::new(RwLock::new(LruCache::new(capacity))),
        }
    }

    /// Thread a cancellation token into every call made by this client
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.cancel_token(token);
        self
    }

    /// The configured project identifier, if any
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.config.identifier.as_deref()
    }

    /// The helper image used for in-volume operations
    #[must_use]
    pub fn helper_image(&self) -> &str {
        &self.config.helper_image
    }

    /// A view of this client with identifier scoping removed.
    ///
    /// Snapshot restore must see volumes and containers that are not
    /// labeled; everything else stays scoped.
    #[must_use]
    pub fn unscoped(&self) -> Self {
        let mut clone = self.clone();
        clone.config.identifier = None;
        clone
    }

    fn scope_filter(&self) -> Option<String> {
        self.config
            .identifier
            .as_ref()
            .map(|id| format!("label={}={id}", crate::IDENTIFIER_LABEL))
    }

    // ---- daemon -----------------------------------------------------

    /// Verify the daemon is reachable
    ///
    /// # Errors
    ///
    /// `External` when the daemon does not answer.
    pub async fn check_daemon(&self) -> Result<()> {
        self.server_version().await.map(drop)
    }

    /// The daemon's server version string
    ///
    /// # Errors
    ///
    /// `External` when the daemon does not answer.
    pub async fn server_version(&self) -> Result<String> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let output = self.executor.execute(&args).await?;
        let version = output.stdout.trim().to_string();
        if version.is_empty() {
            return Err(Error::external(
                "docker.version",
                "daemon did not report a server version",
            ));
        }
        Ok(version)
    }

    /// The compose plugin version, without a leading `v`
    ///
    /// # Errors
    ///
    /// `External` when the plugin is missing.
    pub async fn compose_version(&self) -> Result<String> {
        let args = vec![
            "compose".to_string(),
            "version".to_string(),
            "--short".to_string(),
        ];
        let output = self.executor.execute(&args).await?;
        Ok(output.stdout.trim().trim_start_matches('v').to_string())
    }

    /// Verify the compose plugin meets the minimum supported version
    ///
    /// # Errors
    ///
    /// `External` naming both versions when the plugin is too old.
    pub async fn ensure_compose_version(&self) -> Result<()> {
        let version = self.compose_version().await?;
        if version_at_least(crate::MIN_COMPOSE_VERSION, &version) {
            Ok(())
        } else {
            Err(Error::external(
                "docker.compose.version",
                format!(
                    "compose plugin {version} is older than the required {}",
                    crate::MIN_COMPOSE_VERSION
                ),
            ))
        }
    }

    /// The host endpoint of a named docker context
    ///
    /// # Errors
    ///
    /// `NotFound` when the context does not exist.
    pub async fn context_host(&self, context: &str) -> Result<String> {
        let args = vec![
            "context".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            context.to_string(),
        ];
        let output = self
            .executor
            .execute(&args)
            .await
            .map_err(|e| remap_missing(e, "context", context))?;

        #[derive(serde::Deserialize)]
        struct ContextInspect {
            #[serde(rename = "Endpoints", default)]
            endpoints: BTreeMap<String, ContextEndpoint>,
        }
        #[derive(serde::Deserialize)]
        struct ContextEndpoint {
            #[serde(rename = "Host", default)]
            host: String,
        }

        let inspect: ContextInspect = serde_json::from_str(output.stdout.trim())?;
        inspect
            .endpoints
            .get("docker")
            .map(|endpoint| endpoint.host.clone())
            .ok_or_else(|| {
                Error::not_found(
                    format!("docker.context.inspect[{context}]"),
                    "context has no docker endpoint",
                )
            })
    }

    // ---- volumes ----------------------------------------------------

    /// List volumes, scoped to the identifier when set
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn list_volumes(&self) -> Result<Vec<VolumeSummary>> {
        let mut cmd = VolumeLsCommand::new(self.executor.clone());
        if let Some(filter) = self.scope_filter() {
            cmd = cmd.filter(filter);
        }
        cmd.execute().await
    }

    /// Inspect one volume
    ///
    /// # Errors
    ///
    /// `NotFound` when the volume does not exist.
    pub async fn inspect_volume(&self, name: &str) -> Result<VolumeDetails> {
        VolumeInspectCommand::new(name, self.executor.clone())
            .execute()
            .await
            .map_err(|e| remap_missing(e, "volume", name))
    }

    /// Whether a volume exists on the daemon
    ///
    /// # Errors
    ///
    /// `External` on daemon failure other than absence.
    pub async fn volume_exists(&self, name: &str) -> Result<bool> {
        match self.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == Kind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a volume; the identifier label is always stamped
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn create_volume(&self, name: &str, options: &VolumeOptions) -> Result<()> {
        let mut cmd = VolumeCreateCommand::new(name, self.executor.clone());
        if let Some(ref driver) = options.driver {
            cmd = cmd.driver(driver.clone());
        }
        for (key, value) in &options.options {
            cmd = cmd.driver_opt(key.clone(), value.clone());
        }
        for (key, value) in &options.labels {
            cmd = cmd.label(key.clone(), value.clone());
        }
        if let Some(id) = self.identifier() {
            cmd = cmd.label(crate::IDENTIFIER_LABEL, id);
        }
        cmd.execute().await.map(drop)
    }

    /// Remove a volume
    ///
    /// # Errors
    ///
    /// `NotFound` when the volume does not exist, `Conflict` when in use.
    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        let mut cmd = VolumeRmCommand::new(name, self.executor.clone());
        if force {
            cmd = cmd.force();
        }
        cmd.execute()
            .await
            .map(drop)
            .map_err(|e| remap_missing(e, "volume", name))
            .map_err(|e| remap_in_use(e, "volume", name))
    }

    /// Whether the volume holds no entries at all
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails.
    pub async fn volume_is_empty(&self, name: &str) -> Result<bool> {
        let output = self
            .helper()
            .mount_ro(name, HELPER_MOUNT)
            .script(format!("find {HELPER_MOUNT} -mindepth 1 -print -quit"))
            .execute()
            .await?;
        Ok(output.stdout_is_empty())
    }

    /// Delete every entry in the volume, keeping the volume itself
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails.
    pub async fn clear_volume(&self, name: &str) -> Result<()> {
        self.helper()
            .mount(name, HELPER_MOUNT)
            .script(format!("find {HELPER_MOUNT} -mindepth 1 -delete"))
            .execute()
            .await
            .map(drop)
    }

    /// Containers that mount the given volume
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn containers_using_volume(
        &self,
        name: &str,
        all: bool,
    ) -> Result<Vec<ContainerSummary>> {
        let mut cmd = PsCommand::new(self.executor.clone()).filter(format!("volume={name}"));
        if all {
            cmd = cmd.all();
        }
        cmd.execute().await
    }

    /// Copy the full contents of one volume into another
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails.
    pub async fn copy_volume_data(&self, src: &str, dst: &str) -> Result<()> {
        self.helper()
            .mount_ro(src, "/from")
            .mount(dst, "/to")
            .script("cp -a /from/. /to/")
            .execute()
            .await
            .map(drop)
    }

    // ---- networks ---------------------------------------------------

    /// List networks, scoped to the identifier when set
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        let mut cmd = NetworkLsCommand::new(self.executor.clone());
        if let Some(filter) = self.scope_filter() {
            cmd = cmd.filter(filter);
        }
        cmd.execute().await
    }

    /// Inspect one network
    ///
    /// # Errors
    ///
    /// `NotFound` when the network does not exist.
    pub async fn inspect_network(&self, name: &str) -> Result<NetworkDetails> {
        NetworkInspectCommand::new(name, self.executor.clone())
            .execute()
            .await
            .map_err(|e| remap_missing(e, "network", name))
    }

    /// Whether a network exists on the daemon
    ///
    /// # Errors
    ///
    /// `External` on daemon failure other than absence.
    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        match self.inspect_network(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == Kind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a network; the identifier label is always stamped
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn create_network(&self, name: &str, options: &NetworkOptions) -> Result<()> {
        let mut cmd = NetworkCreateCommand::new(name, self.executor.clone());
        if let Some(ref driver) = options.driver {
            cmd = cmd.driver(driver.clone());
        }
        for (key, value) in &options.options {
            cmd = cmd.option(key.clone(), value.clone());
        }
        for (key, value) in &options.labels {
            cmd = cmd.label(key.clone(), value.clone());
        }
        if let Some(ref subnet) = options.subnet {
            cmd = cmd.subnet(subnet.clone());
        }
        if let Some(ref gateway) = options.gateway {
            cmd = cmd.gateway(gateway.clone());
        }
        if let Some(ref range) = options.ip_range {
            cmd = cmd.ip_range(range.clone());
        }
        for (host, address) in &options.aux_addresses {
            cmd = cmd.aux_address(host.clone(), address.clone());
        }
        if options.attachable {
            cmd = cmd.attachable();
        }
        if options.internal {
            cmd = cmd.internal();
        }
        if options.ipv6 {
            cmd = cmd.ipv6();
        }
        if let Some(id) = self.identifier() {
            cmd = cmd.label(crate::IDENTIFIER_LABEL, id);
        }
        cmd.execute().await.map(drop)
    }

    /// Remove a network
    ///
    /// # Errors
    ///
    /// `NotFound` when the network does not exist.
    pub async fn remove_network(&self, name: &str) -> Result<()> {
        NetworkRmCommand::new(name, self.executor.clone())
            .execute()
            .await
            .map(drop)
            .map_err(|e| remap_missing(e, "network", name))
    }

    // ---- containers -------------------------------------------------

    /// List containers with the given filters, scoped when an identifier
    /// is configured
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn ps_json(&self, all: bool, filters: &[String]) -> Result<Vec<ContainerSummary>> {
        let mut cmd = PsCommand::new(self.executor.clone());
        if all {
            cmd = cmd.all();
        }
        for filter in filters {
            cmd = cmd.filter(filter.clone());
        }
        if let Some(filter) = self.scope_filter() {
            cmd = cmd.filter(filter);
        }
        cmd.execute().await
    }

    /// Labels of one container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn inspect_container_labels(&self, name: &str) -> Result<BTreeMap<String, String>> {
        InspectLabelsCommand::new(name, self.executor.clone())
            .execute()
            .await
            .map_err(|e| remap_missing(e, "container", name))
    }

    /// Add labels to an existing container
    ///
    /// # Errors
    ///
    /// `InvalidInput` when no labels are given, `NotFound` when the
    /// container does not exist.
    pub async fn update_container_labels(
        &self,
        name: &str,
        add: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut cmd = UpdateLabelsCommand::new(name, self.executor.clone());
        for (key, value) in add {
            cmd = cmd.add(key.clone(), value.clone());
        }
        cmd.execute()
            .await
            .map(drop)
            .map_err(|e| remap_missing(e, "container", name))
    }

    /// Stop a container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn stop_container(&self, name: &str) -> Result<()> {
        self.lifecycle(LifecycleVerb::Stop, name).await
    }

    /// Start a container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.lifecycle(LifecycleVerb::Start, name).await
    }

    /// Pause a container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn pause_container(&self, name: &str) -> Result<()> {
        self.lifecycle(LifecycleVerb::Pause, name).await
    }

    /// Unpause a container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn unpause_container(&self, name: &str) -> Result<()> {
        self.lifecycle(LifecycleVerb::Unpause, name).await
    }

    /// Restart a container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn restart_container(&self, name: &str) -> Result<()> {
        self.lifecycle(LifecycleVerb::Restart, name).await
    }

    async fn lifecycle(&self, verb: LifecycleVerb, name: &str) -> Result<()> {
        LifecycleCommand::new(verb, name, self.executor.clone())
            .execute()
            .await
            .map(drop)
            .map_err(|e| remap_missing(e, "container", name))
    }

    /// Remove a container
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let mut cmd = ContainerRmCommand::new(name, self.executor.clone());
        if force {
            cmd = cmd.force();
        }
        cmd.execute()
            .await
            .map(drop)
            .map_err(|e| remap_missing(e, "container", name))
    }

    /// Stream container logs into the writer.
    ///
    /// Follows until the container stops or the token cancels.
    ///
    /// # Errors
    ///
    /// `NotFound` when the container does not exist.
    pub async fn stream_container_logs<W>(
        &self,
        name: &str,
        tail: Option<&str>,
        since: Option<&str>,
        writer: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut cmd = LogsCommand::new(name, self.executor.clone()).follow();
        if let Some(tail) = tail {
            cmd = cmd.tail(tail);
        }
        if let Some(since) = since {
            cmd = cmd.since(since);
        }
        cmd.stream_to(writer)
            .await
            .map_err(|e| remap_missing(e, "container", name))
    }

    // ---- compose ----------------------------------------------------

    /// Resolved service names for a project
    ///
    /// # Errors
    ///
    /// `External` when compose rejects the configuration.
    pub async fn config_services(&self, project: &ComposeProject) -> Result<Vec<String>> {
        let output = ComposeConfigCommand::new(project.clone(), self.executor.clone())
            .services()
            .execute()
            .await?;
        Ok(ComposeConfigCommand::parse_services(&output))
    }

    /// The fully resolved compose document for a project.
    ///
    /// JSON output is preferred; YAML is the fallback for older compose
    /// releases. Results are cached by the project tuple so repeated
    /// planner queries observe one document.
    ///
    /// # Errors
    ///
    /// `External` when compose rejects the configuration.
    pub async fn config_full(&self, project: &ComposeProject) -> Result<Arc<ComposeDocument>> {
        let key = project.cache_key();
        {
            let cache = self.compose_cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(doc) = cache.peek(&key) {
                return Ok(Arc::clone(doc));
            }
        }

        let doc = self.config_full_uncached(project).await?;
        let doc = Arc::new(doc);
        {
            let mut cache = self.compose_cache.write().unwrap_or_else(|e| e.into_inner());
            cache.put(key, Arc::clone(&doc));
        }
        Ok(doc)
    }

    async fn config_full_uncached(&self, project: &ComposeProject) -> Result<ComposeDocument> {
        let json_attempt = ComposeConfigCommand::new(project.clone(), self.executor.clone())
            .format(ConfigFormat::Json)
            .execute()
            .await;
        match json_attempt {
            Ok(output) => {
                if let Ok(doc) = serde_json::from_str(output.stdout.trim()) {
                    return Ok(doc);
                }
                debug!("compose config json output unparseable, retrying as yaml");
            }
            Err(e) if e.kind() == Kind::External => {
                debug!("compose config --format json unsupported, retrying as yaml");
            }
            Err(e) => return Err(e),
        }

        let output = ComposeConfigCommand::new(project.clone(), self.executor.clone())
            .execute()
            .await?;
        Ok(serde_yaml_ng::from_str(&output.stdout)?)
    }

    /// Config hash of one service
    ///
    /// # Errors
    ///
    /// `NotFound` when the service has no hash in the output.
    pub async fn config_hash(&self, project: &ComposeProject, service: &str) -> Result<String> {
        let hashes = self.config_hashes(project, &[service.to_string()]).await?;
        hashes.get(service).cloned().ok_or_else(|| {
            Error::not_found(
                format!("docker.compose.config[{service}]"),
                "service not present in hash output",
            )
        })
    }

    /// Config hashes for a batch of services; empty input hashes all
    ///
    /// # Errors
    ///
    /// `External` when compose rejects the configuration.
    pub async fn config_hashes(
        &self,
        project: &ComposeProject,
        services: &[String],
    ) -> Result<BTreeMap<String, String>> {
        let selector = if services.is_empty() {
            "*".to_string()
        } else {
            services.join(",")
        };
        let output = ComposeConfigCommand::new(project.clone(), self.executor.clone())
            .hash(selector)
            .execute()
            .await?;
        ComposeConfigCommand::parse_hashes(&output)
    }

    /// `compose up -d` for a project
    ///
    /// # Errors
    ///
    /// `External` when compose fails to bring services up.
    pub async fn compose_up(&self, project: &ComposeProject) -> Result<()> {
        ComposeUpCommand::new(project.clone(), self.executor.clone())
            .execute()
            .await
            .map(drop)
    }

    /// `compose ps` for a project
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn compose_ps(
        &self,
        project: &ComposeProject,
        all: bool,
    ) -> Result<Vec<ComposeContainer>> {
        let mut cmd = ComposePsCommand::new(project.clone(), self.executor.clone());
        if all {
            cmd = cmd.all();
        }
        cmd.execute().await
    }

    // ---- volume i/o -------------------------------------------------

    /// A helper-container command against the configured image
    #[must_use]
    pub fn helper(&self) -> RunCommand {
        RunCommand::new(self.config.helper_image.clone(), self.executor.clone())
    }

    /// A helper-container command without a timeout, for streams
    #[must_use]
    pub fn streaming_helper(&self) -> RunCommand {
        RunCommand::new(self.config.helper_image.clone(), self.executor.clone().no_timeout())
    }

    /// Read a file from inside a volume; `None` when it does not exist
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails.
    pub async fn read_volume_file(&self, volume: &str, path: &str) -> Result<Option<String>> {
        let joined = join_volume_path(path);
        let output = self
            .helper()
            .mount_ro(volume, HELPER_MOUNT)
            .script(format!("cat {} 2>/dev/null || true", sh_quote(&joined)))
            .execute()
            .await?;
        if output.stdout_is_empty() {
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    /// Stream the volume's contents as an uncompressed tar archive
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails, `Canceled` on token fire.
    pub async fn stream_tar_from_volume<W>(&self, volume: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.streaming_helper()
            .mount_ro(volume, HELPER_MOUNT)
            .script(format!("tar -cpf - -C {HELPER_MOUNT} --numeric-owner ."))
            .stream_stdout_to(writer)
            .await
    }

    /// Stream the volume's contents as tar compressed with zstd
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails, `Canceled` on token fire.
    pub async fn stream_tar_zstd_from_volume<W>(&self, volume: &str, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.streaming_helper()
            .mount_ro(volume, HELPER_MOUNT)
            .script(format!(
                "{ZSTD_GUARD} && tar -cpf - -C {HELPER_MOUNT} --numeric-owner . | zstd -qc"
            ))
            .stream_stdout_to(writer)
            .await
    }

    /// Extract an uncompressed tar stream into a path inside the volume
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails, `Canceled` on token fire.
    pub async fn extract_tar_to_volume<R>(
        &self,
        volume: &str,
        target: &str,
        reader: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let dest = sh_quote(&join_volume_path(target));
        self.streaming_helper()
            .interactive()
            .mount(volume, HELPER_MOUNT)
            .script(format!(
                "mkdir -p {dest} && tar -xpf - -C {dest} --numeric-owner"
            ))
            .stream_stdin_from(reader)
            .await
    }

    /// Extract a zstd-compressed tar stream into a path inside the volume
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails, `Canceled` on token fire.
    pub async fn extract_tar_zstd_to_volume<R>(
        &self,
        volume: &str,
        target: &str,
        reader: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let dest = sh_quote(&join_volume_path(target));
        self.streaming_helper()
            .interactive()
            .mount(volume, HELPER_MOUNT)
            .script(format!(
                "{ZSTD_GUARD} && mkdir -p {dest} && zstd -qdc | tar -xpf - -C {dest} --numeric-owner"
            ))
            .stream_stdin_from(reader)
            .await
    }

    /// Mirror a local directory into a path inside the volume.
    ///
    /// The directory is packed into a tar archive on the host and
    /// extracted by a helper container; existing files are overwritten,
    /// extra files are left alone.
    ///
    /// # Errors
    ///
    /// `Internal` when the local archive cannot be built, otherwise as
    /// [`extract_tar_to_volume`](Self::extract_tar_to_volume).
    pub async fn sync_dir_to_volume(
        &self,
        volume: &str,
        target: &str,
        local_dir: &Path,
    ) -> Result<()> {
        let dir = local_dir.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut builder = tar::Builder::new(Vec::new());
            builder.follow_symlinks(false);
            builder
                .append_dir_all(".", &dir)
                .map_err(|e| Error::internal("tar.build", format!("failed to pack {}: {e}", dir.display())).with_source(e))?;
            builder
                .into_inner()
                .map_err(|e| Error::internal("tar.build", e.to_string()).with_source(e))
        })
        .await
        .map_err(|e| Error::internal("tar.build", format!("archive task failed: {e}")))??;

        let mut reader = std::io::Cursor::new(archive);
        self.extract_tar_to_volume(volume, target, &mut reader).await
    }

    /// Uncompressed byte count and file count of a volume's contents
    ///
    /// # Errors
    ///
    /// `External` when the helper container fails.
    pub async fn volume_tar_stats(&self, volume: &str) -> Result<(u64, u64)> {
        let output = self
            .streaming_helper()
            .mount_ro(volume, HELPER_MOUNT)
            .script(format!(
                "echo $(tar -cpf - -C {HELPER_MOUNT} --numeric-owner . | wc -c) $(find {HELPER_MOUNT} -type f | wc -l)"
            ))
            .execute()
            .await?;
        let mut parts = output.stdout.split_whitespace();
        let op = format!("docker.run[tar-stats:{volume}]");
        let bytes = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::internal(op.clone(), "missing byte count"))?;
        let files = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::internal(op, "missing file count"))?;
        Ok((bytes, files))
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Desired volume configuration, as passed to [`DockerClient::create_volume`]
#[derive(Debug, Clone, Default)]
pub struct VolumeOptions {
    /// Volume driver
    pub driver: Option<String>,
    /// Driver options
    pub options: BTreeMap<String, String>,
    /// Labels (the identifier label is added by the client)
    pub labels: BTreeMap<String, String>,
}

/// Desired network configuration, as passed to [`DockerClient::create_network`]
#[derive(Debug, Clone, Default)]
pub struct NetworkOptions {
    /// Network driver
    pub driver: Option<String>,
    /// Driver options
    pub options: BTreeMap<String, String>,
    /// Labels (the identifier label is added by the client)
    pub labels: BTreeMap<String, String>,
    /// IPAM subnet
    pub subnet: Option<String>,
    /// IPAM gateway
    pub gateway: Option<String>,
    /// IPAM allocation range
    pub ip_range: Option<String>,
    /// IPAM auxiliary addresses
    pub aux_addresses: BTreeMap<String, String>,
    /// Allow manual attachment
    pub attachable: bool,
    /// Restrict external access
    pub internal: bool,
    /// Enable IPv6
    pub ipv6: bool,
}

/// Per-context client factory with double-checked initialization.
///
/// Reconciliation may touch several contexts in one run; clients are
/// built once per context and shared.
#[derive(Debug, Default)]
pub struct ClientFactory {
    template: ClientConfig,
    clients: RwLock<HashMap<String, Arc<DockerClient>>>,
}

impl ClientFactory {
    /// Create a factory whose clients share the given template
    #[must_use]
    pub fn new(template: ClientConfig) -> Self {
        Self {
            template,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// The client for a context; `None` or `"default"` use the daemon default
    #[must_use]
    pub fn client_for(&self, context: Option<&str>) -> Arc<DockerClient> {
        let key = match context {
            None | Some("default") => String::new(),
            Some(name) => name.to_string(),
        };
        {
            let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
            if let Some(client) = clients.get(&key) {
                return Arc::clone(client);
            }
        }
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Arc::clone(client);
        }
        let mut config = self.template.clone();
        config.context = if key.is_empty() { None } else { Some(key.clone()) };
        let client = Arc::new(DockerClient::with_config(config));
        clients.insert(key, Arc::clone(&client));
        client
    }
}

/// Join an absolute in-volume path below the helper mount point
fn join_volume_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        HELPER_MOUNT.to_string()
    } else {
        format!("{HELPER_MOUNT}/{trimmed}")
    }
}

/// Quote a string for `sh -c` scripts
pub(crate) fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Whether `found` is at least `minimum`, comparing dot-separated
/// numeric segments; non-numeric tails compare as zero
fn version_at_least(minimum: &str, found: &str) -> bool {
    let parse = |version: &str| -> Vec<u64> {
        let mut parts: Vec<u64> = version
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect();
        parts.resize(3, 0);
        parts
    };
    parse(found) >= parse(minimum)
}

/// Turn docker's "no such X" stderr into a `NotFound`
fn remap_missing(err: Error, resource: &str, name: &str) -> Error {
    if err.kind() == Kind::External {
        let message = err.message().to_ascii_lowercase();
        if message.contains("no such") || message.contains("not found") {
            return Error::not_found(
                format!("docker.{resource}.inspect[{name}]"),
                format!("no such {resource}: {name}"),
            )
            .with_source(err);
        }
    }
    err
}

/// Turn docker's "volume is in use" stderr into a `Conflict`
fn remap_in_use(err: Error, resource: &str, name: &str) -> Error {
    if err.kind() == Kind::External && err.message().to_ascii_lowercase().contains("in use") {
        return Error::conflict(
            format!("docker.{resource}.rm[{name}]"),
            format!("{resource} {name} is in use"),
        )
        .with_source(err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("/data/app"), "'/data/app'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_join_volume_path() {
        assert_eq!(join_volume_path("/app/config"), "/target/app/config");
        assert_eq!(join_volume_path("/"), "/target");
        assert_eq!(join_volume_path(""), "/target");
    }

    #[test]
    fn test_scope_filter() {
        let client = DockerClient::with_config(ClientConfig {
            identifier: Some("demo".to_string()),
            ..ClientConfig::default()
        });
        assert_eq!(
            client.scope_filter().as_deref(),
            Some("label=io.dockform.identifier=demo")
        );
        assert!(client.unscoped().scope_filter().is_none());
    }

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("2.23.0", "2.23.0"));
        assert!(version_at_least("2.23.0", "2.24.5"));
        assert!(version_at_least("2.23.0", "2.23"));
        assert!(!version_at_least("2.23.0", "2.22.9"));
        assert!(!version_at_least("2.23.0", "1.29.2"));
    }

    #[test]
    fn test_remap_missing_volume() {
        let err = Error::external("docker.volume.inspect", "Error: No such volume: data");
        let remapped = remap_missing(err, "volume", "data");
        assert_eq!(remapped.kind(), Kind::NotFound);
    }

    #[test]
    fn test_remap_preserves_other_errors() {
        let err = Error::external("docker.volume.rm", "daemon unreachable");
        let remapped = remap_missing(err, "volume", "data");
        assert_eq!(remapped.kind(), Kind::External);
    }

    #[test]
    fn test_factory_caches_per_context() {
        let factory = ClientFactory::new(ClientConfig::default());
        let a = factory.client_for(None);
        let b = factory.client_for(Some("default"));
        assert!(Arc::ptr_eq(&a, &b));
        let c = factory.client_for(Some("remote"));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
