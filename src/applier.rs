//! Plan execution.
//!
//! Actions run in the planner's order, sequentially except for fileset
//! syncs, which fan out over a bounded worker pool (distinct targets
//! cannot conflict and the engine serializes same-target writers). The
//! destructive actions form recovery groups: containers they stop are
//! restarted afterwards whether the mutation succeeded or not, so user
//! workloads are never left down by a failure.

use crate::client::{DockerClient, NetworkOptions, VolumeOptions};
use crate::error::{Error, Result};
use crate::fileset::FilesetEngine;
use crate::manifest::{Manifest, TopLevelResource};
use crate::overlay::{Overlay, OverlayOptions};
use crate::planner::{Action, Plan};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod events;

use events::{ApplyEvent, EventSender};

/// Suffix of the temporary clone used while migrating a volume
const MIGRATE_SUFFIX: &str = "-dockform-migrate";

/// Applier options
#[derive(Debug, Clone, Copy)]
pub struct ApplierOptions {
    /// Worker pool size for parallelizable actions
    pub worker_count: usize,
    /// Overlay construction options
    pub overlay: OverlayOptions,
}

impl Default for ApplierOptions {
    fn default() -> Self {
        Self {
            worker_count: 4,
            overlay: OverlayOptions::default(),
        }
    }
}

/// Outcome of executing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Actions that changed something
    pub completed: usize,
    /// Noop entries skipped
    pub skipped: usize,
    /// Total wall-clock duration
    pub duration: Duration,
}

/// Executes plans against the daemon
#[derive(Debug)]
pub struct Applier<'a> {
    manifest: &'a Manifest,
    client: Arc<DockerClient>,
    engine: FilesetEngine,
    options: ApplierOptions,
    events: Option<EventSender>,
    cancel: CancellationToken,
}

impl<'a> Applier<'a> {
    /// Create an applier over a frozen manifest
    #[must_use]
    pub fn new(manifest: &'a Manifest, client: Arc<DockerClient>, options: ApplierOptions) -> Self {
        let engine = FilesetEngine::new(Arc::clone(&client));
        Self {
            manifest,
            client,
            engine,
            options,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe the given channel to progress events
    #[must_use]
    pub fn events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// Observe the given cancellation token between and inside actions
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Execute a plan to completion or first failure.
    ///
    /// # Errors
    ///
    /// The first action failure, with compensations already run;
    /// `Canceled` when the token fired.
    pub async fn execute(&self, plan: Plan) -> Result<ApplyReport> {
        let started = Instant::now();
        let mut report = ApplyReport::default();
        let actions = plan.into_actions();
        let mut index = 0;

        while index < actions.len() {
            if self.cancel.is_cancelled() {
                return Err(Error::canceled("apply"));
            }

            let action = &actions[index];
            if action.is_noop() {
                report.skipped += 1;
                index += 1;
                continue;
            }

            // Consecutive fileset syncs drain as one parallel batch.
            if matches!(action, Action::SyncFileset { .. }) {
                let batch_end = actions[index..]
                    .iter()
                    .position(|a| !matches!(a, Action::SyncFileset { .. }))
                    .map_or(actions.len(), |offset| index + offset);
                let batch = &actions[index..batch_end];
                self.run_batch(batch).await?;
                report.completed += batch.len();
                index = batch_end;
                continue;
            }

            self.run_action(action).await?;
            report.completed += 1;
            index += 1;
        }

        report.duration = started.elapsed();
        self.emit(ApplyEvent::PlanFinished {
            completed: report.completed,
            duration: report.duration,
        });
        Ok(report)
    }

    async fn run_batch(&self, batch: &[Action]) -> Result<()> {
        let mut results = stream::iter(batch.iter().map(|action| self.run_action(action)))
            .buffer_unordered(self.options.worker_count.max(1));
        while let Some(result) = results.next().await {
            result?;
        }
        Ok(())
    }

    async fn run_action(&self, action: &Action) -> Result<()> {
        let summary = action.summary();
        self.emit(ApplyEvent::ActionStarted {
            summary: summary.clone(),
        });
        let started = Instant::now();
        let result = self.perform(action).await;
        match &result {
            Ok(()) => {
                info!(action = %summary, "applied");
                self.emit(ApplyEvent::ActionFinished {
                    summary,
                    duration: started.elapsed(),
                });
            }
            Err(e) => {
                self.emit(ApplyEvent::ActionFailed {
                    summary,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn perform(&self, action: &Action) -> Result<()> {
        match action {
            Action::CreateVolume { name } => {
                let spec = self.manifest.volumes.get(name);
                self.client
                    .create_volume(name, &volume_options(spec))
                    .await
            }
            Action::RemoveVolume { name } => self.client.remove_volume(name, false).await,
            Action::MigrateVolume { name } => self.migrate_volume(name).await,
            Action::CreateNetwork { name } => {
                let spec = self.manifest.networks.get(name);
                self.client
                    .create_network(name, &network_options(spec))
                    .await
            }
            Action::RemoveNetwork { name } => self.client.remove_network(name).await,
            Action::RecreateNetwork { name } => self.recreate_network(name).await,
            Action::ComposeUp { stack } => self.compose_up(stack).await,
            Action::StopContainer { name } => self.client.stop_container(name).await,
            Action::StartContainer { name } => self.client.start_container(name).await,
            Action::RemoveContainer { name, force } => {
                self.client.remove_container(name, *force).await
            }
            Action::SyncFileset { name } => {
                let fileset = self.manifest.filesets.get(name).ok_or_else(|| {
                    Error::invalid_input("apply.fileset", format!("unknown fileset {name}"))
                })?;
                self.engine.sync(self.manifest, name, fileset).await.map(drop)
            }
            Action::Noop { .. } => Ok(()),
        }
    }

    async fn compose_up(&self, stack_name: &str) -> Result<()> {
        let stack = self.manifest.stacks.get(stack_name).ok_or_else(|| {
            Error::invalid_input("apply.compose_up", format!("unknown stack {stack_name}"))
        })?;
        let mut overlay = Overlay::build(
            &self.client,
            &self.manifest.project_identifier,
            stack_name,
            stack,
            &self.manifest.base_dir,
            self.options.overlay,
        )
        .await?;
        let result = self.client.compose_up(overlay.project()).await;
        if result.is_err() {
            if let Some(path) = overlay.preserve() {
                warn!(stack = stack_name, overlay = %path.display(), "kept overlay for inspection");
            }
        }
        result
    }

    /// Rebuild a drifted volume while preserving its data.
    ///
    /// Docker cannot change a volume's driver or options in place, nor
    /// rename one. The data is cloned to a temporary volume, the original
    /// is re-created with the desired configuration, and the data is
    /// copied back. Containers stopped for the swap are restarted in the
    /// deferred step even when the swap fails.
    async fn migrate_volume(&self, name: &str) -> Result<()> {
        let spec = volume_options(self.manifest.volumes.get(name));
        let temp = format!("{name}{MIGRATE_SUFFIX}");

        self.client.create_volume(&temp, &spec).await?;
        self.client.copy_volume_data(name, &temp).await?;

        let users = self.client.containers_using_volume(name, true).await?;
        let mut restart: Vec<String> = Vec::new();
        let mut result: Result<()> = Ok(());

        for user in &users {
            if !user.is_running() {
                continue;
            }
            match self.client.stop_container(&user.name).await {
                Ok(()) => restart.push(user.name.clone()),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if result.is_ok() {
            result = self.swap_volume(name, &temp, &spec).await;
        }

        // Deferred restart: exactly the containers that were running.
        for container in &restart {
            if let Err(e) = self.client.start_container(container).await {
                warn!(container = %container, error = %e, "deferred restart failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    async fn swap_volume(&self, name: &str, temp: &str, spec: &VolumeOptions) -> Result<()> {
        self.client.remove_volume(name, false).await?;
        self.client.create_volume(name, spec).await?;
        self.client.copy_volume_data(temp, name).await?;
        self.client.remove_volume(temp, false).await
    }

    /// Remove and re-create a drifted network.
    ///
    /// Attached running containers are stopped for the swap; compose
    /// containers re-resolve the network on start, so the deferred
    /// restart doubles as reattachment.
    async fn recreate_network(&self, name: &str) -> Result<()> {
        let spec = network_options(self.manifest.networks.get(name));
        let details = self.client.inspect_network(name).await?;
        let attached = details.container_names();

        let all = self.client.ps_json(true, &[]).await?;
        let mut restart: Vec<String> = Vec::new();
        let mut result: Result<()> = Ok(());

        for container in &all {
            if !attached.contains(&container.name) || !container.is_running() {
                continue;
            }
            match self.client.stop_container(&container.name).await {
                Ok(()) => restart.push(container.name.clone()),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if result.is_ok() {
            result = async {
                self.client.remove_network(name).await?;
                self.client.create_network(name, &spec).await
            }
            .await;
        }

        for container in &restart {
            if let Err(e) = self.client.start_container(container).await {
                warn!(container = %container, error = %e, "deferred restart failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn emit(&self, event: ApplyEvent) {
        if let Some(ref sender) = self.events {
            let _ = sender.send(event);
        }
    }
}

/// Desired volume configuration from a manifest declaration
pub(crate) fn volume_options(spec: Option<&TopLevelResource>) -> VolumeOptions {
    spec.map_or_else(VolumeOptions::default, |spec| VolumeOptions {
        driver: spec.driver.clone(),
        options: spec.options.clone(),
        labels: spec.labels.clone(),
    })
}

/// Desired network configuration from a manifest declaration
pub(crate) fn network_options(spec: Option<&TopLevelResource>) -> NetworkOptions {
    spec.map_or_else(NetworkOptions::default, |spec| NetworkOptions {
        driver: spec.driver.clone(),
        options: spec.options.clone(),
        labels: spec.labels.clone(),
        subnet: spec.subnet.clone(),
        gateway: spec.gateway.clone(),
        ip_range: spec.ip_range.clone(),
        aux_addresses: spec.aux_addresses.clone(),
        attachable: spec.attachable,
        internal: spec.internal,
        ipv6: spec.ipv6,
    })
}
