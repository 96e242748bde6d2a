//! Stack and service planning.
//!
//! The overlay is resolved once per stack; its config hashes are the
//! drift oracle. A container whose `com.docker.compose.config-hash`
//! label matches the desired hash is up to date; anything else schedules
//! one `ComposeUp` for the whole stack. Containers for services that no
//! longer exist are removed.

use crate::client::DockerClient;
use crate::command::container::{labels_match_identifier, ContainerSummary};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::overlay::{Overlay, OverlayOptions};
use crate::planner::{retry, Action, Plan};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Plan every stack; returns the set of compose project names the
/// manifest accounts for (used by the orphan sweep)
pub(crate) async fn plan_stacks(
    manifest: &Manifest,
    client: &DockerClient,
    overlay_options: OverlayOptions,
    plan: &mut Plan,
) -> Result<BTreeSet<String>> {
    let mut desired_projects = BTreeSet::new();

    for (stack_name, stack) in &manifest.stacks {
        let project_name = manifest.stack_project_name(stack_name);
        desired_projects.insert(project_name.clone());

        let overlay = Overlay::build(
            client,
            &manifest.project_identifier,
            stack_name,
            stack,
            &manifest.base_dir,
            overlay_options,
        )
        .await?;

        let desired_hashes = retry::with_retries(|| client.config_hashes(overlay.project(), &[]))
            .await
            .map_err(|e| e.in_op(format!("plan.stacks[{stack_name}]")))?;

        let ps_filters = vec![format!(
            "label={}={project_name}",
            crate::COMPOSE_PROJECT_LABEL
        )];
        let containers = retry::with_retries(|| client.ps_json(true, &ps_filters))
            .await
            .map_err(|e| e.in_op(format!("plan.stacks[{stack_name}]")))?;
        let by_service = group_by_service(&containers);

        let desired_services: BTreeSet<String> =
            overlay.document().services.keys().cloned().collect();
        let mut needs_up = false;

        for service in &desired_services {
            let desired_hash = desired_hashes.get(service.as_str());
            match by_service.get(service.as_str()) {
                None => {
                    debug!(stack = %stack_name, service = %service, "service has no container");
                    needs_up = true;
                }
                Some(existing) => {
                    let in_sync = desired_hash.is_some()
                        && existing.iter().all(|container| {
                            container.config_hash().as_deref()
                                == desired_hash.map(String::as_str)
                        });
                    if !in_sync {
                        debug!(stack = %stack_name, service = %service, "config hash drifted");
                        needs_up = true;
                    }
                }
            }
        }

        // Containers for services the resolved document no longer names.
        // Only containers carrying the ownership label (current or
        // legacy form) may ever be removed.
        for (service, stale) in &by_service {
            if desired_services.contains(service.as_str()) {
                continue;
            }
            for container in stale {
                if !labels_match_identifier(&container.label_map(), &manifest.project_identifier) {
                    continue;
                }
                plan.push(Action::RemoveContainer {
                    name: container.name.clone(),
                    force: true,
                });
            }
        }

        if needs_up {
            plan.push(Action::ComposeUp {
                stack: stack_name.clone(),
            });
        } else {
            plan.push(Action::Noop {
                resource: format!("stack {stack_name}"),
                reason: "all services up to date".to_string(),
            });
        }
    }

    Ok(desired_projects)
}

/// Group a container listing by its compose service label; unlabeled
/// containers are ignored
pub(crate) fn group_by_service(
    containers: &[ContainerSummary],
) -> BTreeMap<String, Vec<&ContainerSummary>> {
    let mut grouped: BTreeMap<String, Vec<&ContainerSummary>> = BTreeMap::new();
    for container in containers {
        if let Some(service) = container.compose_service() {
            grouped.entry(service).or_default().push(container);
        }
    }
    grouped
}
