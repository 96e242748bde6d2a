//! The operations a CLI shell binds to.
//!
//! Each function takes the frozen manifest plus a configured client and
//! returns typed results; the shell owns prompting, printing and process
//! exit. Exit codes come from [`crate::error::Kind::exit_code`].

use crate::applier::events::EventSender;
use crate::applier::{Applier, ApplierOptions, ApplyReport};
use crate::client::{ClientConfig, DockerClient};
use crate::error::{Error, Result};
use crate::fileset::{FilesetEngine, SyncOutcome};
use crate::manifest::Manifest;
use crate::overlay::OverlayOptions;
use crate::planner::{Action, Plan, PlanOptions, Planner};
use crate::snapshot::{RestoreOptions, RestoreReport, SnapshotEngine, SnapshotInfo};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Options for [`apply`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// The shell confirmed (or was told to skip confirming) the plan
    pub skip_confirmation: bool,
    /// Remove labeled containers no manifest stack accounts for
    pub prune: bool,
    /// Worker pool size for parallelizable actions; 0 uses the default
    pub worker_count: usize,
    /// Overlay construction options
    pub overlay: OverlayOptions,
}

/// Options for [`destroy`]
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    /// Must equal the project identifier
    pub confirm_text: String,
}

/// A client scoped to the manifest's project identifier
#[must_use]
pub fn client_for(manifest: &Manifest) -> DockerClient {
    DockerClient::with_config(ClientConfig {
        identifier: Some(manifest.project_identifier.clone()),
        ..ClientConfig::default()
    })
}

/// Compute a plan without touching anything
///
/// # Errors
///
/// Propagates planning failures with their kind intact.
pub async fn plan(
    manifest: &Manifest,
    client: Arc<DockerClient>,
    options: PlanOptions,
) -> Result<Plan> {
    Planner::new(manifest, client, options).plan().await
}

/// Plan and execute in one run.
///
/// The plan is recomputed here even when the shell already previewed
/// one, so the executed actions always reflect live state.
///
/// # Errors
///
/// Planning failures, or the first action failure with compensations run.
pub async fn apply(
    manifest: &Manifest,
    client: Arc<DockerClient>,
    options: ApplyOptions,
    events: Option<EventSender>,
) -> Result<ApplyReport> {
    let plan_options = PlanOptions {
        prune: options.prune,
        overlay: options.overlay,
    };
    let plan = Planner::new(manifest, Arc::clone(&client), plan_options)
        .plan()
        .await?;

    let applier_options = ApplierOptions {
        worker_count: if options.worker_count == 0 {
            ApplierOptions::default().worker_count
        } else {
            options.worker_count
        },
        overlay: options.overlay,
    };
    let mut applier = Applier::new(manifest, client, applier_options);
    if let Some(sender) = events {
        applier = applier.events(sender);
    }
    applier.execute(plan).await
}

/// Remove everything the manifest manages.
///
/// External resources are never touched. The confirm text must equal
/// the project identifier; this is the only guard the core enforces.
///
/// # Errors
///
/// `Validation` on a wrong confirm text, otherwise as [`apply`].
pub async fn destroy(
    manifest: &Manifest,
    client: Arc<DockerClient>,
    options: DestroyOptions,
    events: Option<EventSender>,
) -> Result<ApplyReport> {
    if options.confirm_text != manifest.project_identifier {
        return Err(Error::validation(
            "destroy.confirm",
            format!(
                "confirmation text must be {:?}",
                manifest.project_identifier
            ),
        ));
    }

    let mut plan = Plan::new();

    // Every labeled container goes; the client scopes the listing.
    for container in client.ps_json(true, &[]).await? {
        plan.push(Action::RemoveContainer {
            name: container.name,
            force: true,
        });
    }

    for (name, spec) in &manifest.volumes {
        if !spec.external && client.volume_exists(name).await? {
            plan.push(Action::RemoveVolume { name: name.clone() });
        }
    }
    // Fileset target volumes are managed unless declared external above.
    for name in manifest.desired_volume_names() {
        if manifest.volumes.contains_key(&name) {
            continue;
        }
        if client.volume_exists(&name).await? {
            plan.push(Action::RemoveVolume { name });
        }
    }

    for (name, spec) in &manifest.networks {
        if !spec.external && client.network_exists(name).await? {
            plan.push(Action::RemoveNetwork { name: name.clone() });
        }
    }

    plan.finalize();

    let mut applier = Applier::new(manifest, client, ApplierOptions::default());
    if let Some(sender) = events {
        applier = applier.events(sender);
    }
    applier.execute(plan).await
}

/// Synchronize every fileset, regardless of stack state.
///
/// There is no plan here to carry the restart actions, so restart
/// propagation runs directly after each changed sync.
///
/// # Errors
///
/// The first sync failure; completed filesets keep their new indexes.
pub async fn filesets_apply(
    manifest: &Manifest,
    client: Arc<DockerClient>,
) -> Result<BTreeMap<String, SyncOutcome>> {
    let engine = FilesetEngine::new(client);
    let mut outcomes = BTreeMap::new();
    for (name, fileset) in &manifest.filesets {
        let mut outcome = engine.sync(manifest, name, fileset).await?;
        if outcome.changed && !fileset.restart_services.is_empty() {
            outcome.restarted = engine.restart_services(manifest, fileset).await?;
        }
        outcomes.insert(name.clone(), outcome);
    }
    Ok(outcomes)
}

/// Snapshot one volume into `out_dir`
///
/// # Errors
///
/// As [`SnapshotEngine::create`].
pub async fn snapshot_create(
    client: Arc<DockerClient>,
    volume: &str,
    out_dir: &Path,
    note: Option<String>,
) -> Result<SnapshotInfo> {
    SnapshotEngine::new(client).create(volume, out_dir, note).await
}

/// Restore an archive into a declared volume
///
/// # Errors
///
/// As [`SnapshotEngine::restore`].
pub async fn snapshot_restore(
    manifest: &Manifest,
    client: Arc<DockerClient>,
    volume: &str,
    archive: &Path,
    options: RestoreOptions,
) -> Result<RestoreReport> {
    SnapshotEngine::new(client)
        .restore(manifest, volume, archive, options)
        .await
}

/// Process exit code for an operation result
#[must_use]
pub fn exit_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_success() {
        let ok: Result<()> = Ok(());
        assert_eq!(exit_code(&ok), 0);
    }

    #[test]
    fn test_exit_code_maps_kinds() {
        let err: Result<()> = Err(Error::conflict("x", "y"));
        assert_eq!(exit_code(&err), 66);
        let err: Result<()> = Err(Error::canceled("x"));
        assert_eq!(exit_code(&err), 130);
    }

    #[tokio::test]
    async fn test_destroy_requires_confirmation() {
        let manifest = Manifest {
            project_identifier: "demo".to_string(),
            ..Manifest::default()
        };
        let client = Arc::new(client_for(&manifest));
        let err = destroy(
            &manifest,
            client,
            DestroyOptions {
                confirm_text: "wrong".to_string(),
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn test_client_for_scopes_identifier() {
        let manifest = Manifest {
            project_identifier: "demo".to_string(),
            ..Manifest::default()
        };
        let client = client_for(&manifest);
        assert_eq!(client.identifier(), Some("demo"));
    }
}
