//! Fileset planning.
//!
//! The tree hash is the single marker of content identity: equal hashes
//! mean the target volume already holds exactly the local content. An
//! out-of-sync fileset also schedules stop/start pairs for its
//! `restart_services` targets, so a dry run shows exactly which
//! containers the sync will bounce.

use crate::error::Result;
use crate::fileset::FilesetEngine;
use crate::manifest::Manifest;
use crate::planner::{retry, Action, Plan};

pub(crate) async fn plan_filesets(
    manifest: &Manifest,
    engine: &FilesetEngine,
    plan: &mut Plan,
) -> Result<()> {
    for (name, fileset) in &manifest.filesets {
        let (local, remote) = retry::with_retries(|| engine.load_indexes(manifest, fileset))
            .await
            .map_err(|e| e.in_op(format!("plan.filesets[{name}]")))?;
        if local.tree_hash == remote.tree_hash {
            plan.push(Action::Noop {
                resource: format!("fileset {name}"),
                reason: "content up to date".to_string(),
            });
            continue;
        }

        plan.push(Action::SyncFileset { name: name.clone() });

        if fileset.restart_services.is_empty() {
            continue;
        }
        let targets = retry::with_retries(|| engine.restart_targets(manifest, fileset))
            .await
            .map_err(|e| e.in_op(format!("plan.filesets[{name}]")))?;
        for container in targets {
            plan.push(Action::StopContainer {
                name: container.clone(),
            });
            plan.push(Action::StartContainer { name: container });
        }
    }
    Ok(())
}
