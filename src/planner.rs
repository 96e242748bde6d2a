//! Desired vs. observed diffing.
//!
//! The planner reads the frozen manifest and the live daemon state and
//! emits an ordered [`Plan`] of typed [`Action`]s. Reads retry transient
//! daemon failures; a permanent failure for any resource class aborts
//! planning so a partial plan is never observable.

use crate::client::DockerClient;
use crate::error::Result;
use crate::fileset::FilesetEngine;
use crate::manifest::Manifest;
use crate::overlay::OverlayOptions;
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod filesets;
pub mod networks;
pub mod retry;
pub mod stacks;
pub mod volumes;

/// One reconciliation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create a missing managed volume
    CreateVolume {
        /// Volume name
        name: String,
    },
    /// Remove a managed volume
    RemoveVolume {
        /// Volume name
        name: String,
    },
    /// Rebuild a drifted volume, preserving its data
    MigrateVolume {
        /// Volume name
        name: String,
    },
    /// Create a missing managed network
    CreateNetwork {
        /// Network name
        name: String,
    },
    /// Remove a managed network
    RemoveNetwork {
        /// Network name
        name: String,
    },
    /// Remove and re-create a drifted network
    RecreateNetwork {
        /// Network name
        name: String,
    },
    /// Bring a stack up through its labeled overlay
    ComposeUp {
        /// Stack key in the manifest
        stack: String,
    },
    /// Stop one container
    StopContainer {
        /// Container name
        name: String,
    },
    /// Start one container
    StartContainer {
        /// Container name
        name: String,
    },
    /// Remove one container
    RemoveContainer {
        /// Container name
        name: String,
        /// Remove even when running
        force: bool,
    },
    /// Synchronize a fileset into its target volume
    SyncFileset {
        /// Fileset key in the manifest
        name: String,
    },
    /// Nothing to do for a resource; kept for visibility
    Noop {
        /// Resource key (`volume data`, `stack web`, …)
        resource: String,
        /// Why nothing happens
        reason: String,
    },
}

impl Action {
    /// The resource key this action touches
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::CreateVolume { name }
            | Self::RemoveVolume { name }
            | Self::MigrateVolume { name }
            | Self::CreateNetwork { name }
            | Self::RemoveNetwork { name }
            | Self::RecreateNetwork { name }
            | Self::StopContainer { name }
            | Self::StartContainer { name }
            | Self::RemoveContainer { name, .. }
            | Self::SyncFileset { name } => name,
            Self::ComposeUp { stack } => stack,
            Self::Noop { resource, .. } => resource,
        }
    }

    /// Position of this action's class in the topological order
    #[must_use]
    pub fn phase(&self) -> u8 {
        match self {
            Self::CreateVolume { .. } | Self::CreateNetwork { .. } => 0,
            Self::MigrateVolume { .. } | Self::RecreateNetwork { .. } => 1,
            Self::ComposeUp { .. } => 2,
            Self::SyncFileset { .. } => 3,
            Self::StopContainer { .. } | Self::StartContainer { .. } => 4,
            Self::RemoveContainer { .. } => 5,
            Self::RemoveVolume { .. } | Self::RemoveNetwork { .. } => 6,
            Self::Noop { .. } => 7,
        }
    }

    /// Whether this action changes anything
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop { .. })
    }

    /// Human-readable one-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::CreateVolume { name } => format!("create volume {name}"),
            Self::RemoveVolume { name } => format!("remove volume {name}"),
            Self::MigrateVolume { name } => format!("migrate volume {name}"),
            Self::CreateNetwork { name } => format!("create network {name}"),
            Self::RemoveNetwork { name } => format!("remove network {name}"),
            Self::RecreateNetwork { name } => format!("recreate network {name}"),
            Self::ComposeUp { stack } => format!("compose up stack {stack}"),
            Self::StopContainer { name } => format!("stop container {name}"),
            Self::StartContainer { name } => format!("start container {name}"),
            Self::RemoveContainer { name, force } => {
                if *force {
                    format!("remove container {name} (forced)")
                } else {
                    format!("remove container {name}")
                }
            }
            Self::SyncFileset { name } => format!("sync fileset {name}"),
            Self::Noop { resource, reason } => format!("{resource}: {reason}"),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// An ordered, single-use sequence of actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    /// Create an empty plan
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, merging duplicate entries
    pub fn push(&mut self, action: Action) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }

    /// Sort into the topological class order; lexicographic within a class
    pub fn finalize(&mut self) {
        self.actions
            .sort_by(|a, b| (a.phase(), a.key()).cmp(&(b.phase(), b.key())));
    }

    /// The ordered actions
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Consume the plan into its actions
    #[must_use]
    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    /// Whether every entry is a noop
    #[must_use]
    pub fn is_noop_only(&self) -> bool {
        self.actions.iter().all(Action::is_noop)
    }

    /// Count of actions that change something
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.actions.iter().filter(|a| !a.is_noop()).count()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_noop_only() {
            return writeln!(f, "nothing to do");
        }
        for action in &self.actions {
            let marker = if action.is_noop() { ' ' } else { '*' };
            writeln!(f, "{marker} {action}")?;
        }
        Ok(())
    }
}

/// Planner options
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Remove labeled containers that no manifest stack accounts for
    pub prune: bool,
    /// Overlay construction options
    pub overlay: OverlayOptions,
}

/// Computes a plan from a frozen manifest and the live daemon state
#[derive(Debug)]
pub struct Planner<'a> {
    manifest: &'a Manifest,
    client: Arc<DockerClient>,
    engine: FilesetEngine,
    options: PlanOptions,
}

impl<'a> Planner<'a> {
    /// Create a planner over a frozen manifest
    #[must_use]
    pub fn new(manifest: &'a Manifest, client: Arc<DockerClient>, options: PlanOptions) -> Self {
        let engine = FilesetEngine::new(Arc::clone(&client));
        Self {
            manifest,
            client,
            engine,
            options,
        }
    }

    /// Compute the full plan across all five resource classes
    ///
    /// # Errors
    ///
    /// Any permanent query failure aborts planning with its kind intact.
    pub async fn plan(&self) -> Result<Plan> {
        let mut plan = Plan::new();
        volumes::plan_volumes(self.manifest, &self.client, &mut plan).await?;
        networks::plan_networks(self.manifest, &self.client, &mut plan).await?;
        let desired_projects =
            stacks::plan_stacks(self.manifest, &self.client, self.options.overlay, &mut plan)
                .await?;
        filesets::plan_filesets(self.manifest, &self.engine, &mut plan).await?;
        if self.options.prune {
            self.plan_orphans(&desired_projects, &mut plan).await?;
        }
        plan.finalize();
        Ok(plan)
    }

    /// Labeled containers whose compose project no manifest stack claims
    async fn plan_orphans(
        &self,
        desired_projects: &BTreeSet<String>,
        plan: &mut Plan,
    ) -> Result<()> {
        let containers = retry::with_retries(|| self.client.ps_json(true, &[])).await?;
        for container in containers {
            let labels = container.label_map();
            if !crate::command::container::labels_match_identifier(
                &labels,
                &self.manifest.project_identifier,
            ) {
                continue;
            }
            let claimed = labels
                .get(crate::COMPOSE_PROJECT_LABEL)
                .is_some_and(|project| desired_projects.contains(project));
            if !claimed {
                plan.push(Action::RemoveContainer {
                    name: container.name,
                    force: true,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_orders_classes_topologically() {
        let mut plan = Plan::new();
        plan.push(Action::RemoveContainer {
            name: "old".to_string(),
            force: true,
        });
        plan.push(Action::SyncFileset {
            name: "conf".to_string(),
        });
        plan.push(Action::ComposeUp {
            stack: "web".to_string(),
        });
        plan.push(Action::CreateNetwork {
            name: "frontend".to_string(),
        });
        plan.push(Action::CreateVolume {
            name: "data".to_string(),
        });
        plan.push(Action::MigrateVolume {
            name: "data2".to_string(),
        });
        plan.finalize();

        let phases: Vec<u8> = plan.actions().iter().map(Action::phase).collect();
        let mut sorted = phases.clone();
        sorted.sort_unstable();
        assert_eq!(phases, sorted);
        assert_eq!(plan.actions()[0].key(), "data");
        assert_eq!(plan.actions()[1].key(), "frontend");
    }

    #[test]
    fn test_plan_lexicographic_within_class() {
        let mut plan = Plan::new();
        plan.push(Action::CreateVolume {
            name: "zeta".to_string(),
        });
        plan.push(Action::CreateVolume {
            name: "alpha".to_string(),
        });
        plan.finalize();
        assert_eq!(plan.actions()[0].key(), "alpha");
    }

    #[test]
    fn test_restart_pairs_follow_syncs_in_order() {
        let mut plan = Plan::new();
        plan.push(Action::SyncFileset {
            name: "conf".to_string(),
        });
        plan.push(Action::StopContainer {
            name: "web-app-1".to_string(),
        });
        plan.push(Action::StartContainer {
            name: "web-app-1".to_string(),
        });
        plan.finalize();

        let actions = plan.actions();
        assert!(matches!(actions[0], Action::SyncFileset { .. }));
        // Stable sort keeps stop before start for the same container.
        assert!(matches!(actions[1], Action::StopContainer { .. }));
        assert!(matches!(actions[2], Action::StartContainer { .. }));
    }

    #[test]
    fn test_plan_merges_duplicates() {
        let mut plan = Plan::new();
        plan.push(Action::ComposeUp {
            stack: "web".to_string(),
        });
        plan.push(Action::ComposeUp {
            stack: "web".to_string(),
        });
        assert_eq!(plan.actions().len(), 1);
    }

    #[test]
    fn test_noop_only_plan() {
        let mut plan = Plan::new();
        plan.push(Action::Noop {
            resource: "volume data".to_string(),
            reason: "up to date".to_string(),
        });
        assert!(plan.is_noop_only());
        assert_eq!(plan.change_count(), 0);
        assert_eq!(format!("{plan}"), "nothing to do\n");
    }
}
