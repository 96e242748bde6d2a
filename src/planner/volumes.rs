//! Volume planning.
//!
//! The desired set is the union of declared volumes and every fileset
//! target. External volumes are verified but never mutated; drift on a
//! managed volume is only acted on when `migrate: true` was declared.

use crate::client::DockerClient;
use crate::command::volume::VolumeDetails;
use crate::error::{Error, Kind, Result};
use crate::manifest::{Manifest, TopLevelResource};
use crate::planner::{retry, Action, Plan};
use tracing::warn;

pub(crate) async fn plan_volumes(
    manifest: &Manifest,
    client: &DockerClient,
    plan: &mut Plan,
) -> Result<()> {
    let default_spec = TopLevelResource::default();
    for name in manifest.desired_volume_names() {
        let spec = manifest.volumes.get(&name).unwrap_or(&default_spec);
        let observed = match retry::with_retries(|| client.inspect_volume(&name)).await {
            Ok(details) => Some(details),
            Err(e) if e.kind() == Kind::NotFound => None,
            Err(e) => return Err(e.in_op("plan.volumes")),
        };

        if spec.external {
            match observed {
                Some(_) => plan.push(Action::Noop {
                    resource: format!("volume {name}"),
                    reason: "external, exists".to_string(),
                }),
                None => {
                    return Err(Error::not_found(
                        "plan.volumes",
                        format!("external volume {name} does not exist"),
                    ));
                }
            }
            continue;
        }

        match observed {
            None => plan.push(Action::CreateVolume { name }),
            Some(details) if volume_drifted(spec, &details) => {
                if spec.migrate {
                    plan.push(Action::MigrateVolume { name });
                } else {
                    warn!(
                        volume = %name,
                        "volume configuration drifted; declare `migrate: true` to rebuild"
                    );
                    plan.push(Action::Noop {
                        resource: format!("volume {name}"),
                        reason: "drifted, migration not enabled".to_string(),
                    });
                }
            }
            Some(_) => plan.push(Action::Noop {
                resource: format!("volume {name}"),
                reason: "up to date".to_string(),
            }),
        }
    }
    Ok(())
}

/// Whether the observed volume differs from the declaration.
///
/// Only declared fields carry an opinion: an absent driver or empty
/// option set matches anything.
pub(crate) fn volume_drifted(spec: &TopLevelResource, observed: &VolumeDetails) -> bool {
    if let Some(ref driver) = spec.driver {
        if *driver != observed.driver {
            return true;
        }
    }
    if !spec.options.is_empty() && spec.options != observed.options {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn observed(driver: &str, options: &[(&str, &str)]) -> VolumeDetails {
        VolumeDetails {
            name: "data".to_string(),
            driver: driver.to_string(),
            mountpoint: String::new(),
            options: options
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_unspecified_fields_never_drift() {
        let spec = TopLevelResource::default();
        assert!(!volume_drifted(&spec, &observed("local", &[("o", "bind")])));
    }

    #[test]
    fn test_driver_mismatch_drifts() {
        let spec = TopLevelResource {
            driver: Some("local".to_string()),
            ..TopLevelResource::default()
        };
        assert!(volume_drifted(&spec, &observed("nfs", &[])));
        assert!(!volume_drifted(&spec, &observed("local", &[])));
    }

    #[test]
    fn test_option_mismatch_drifts() {
        let spec = TopLevelResource {
            options: [("type".to_string(), "tmpfs".to_string())].into_iter().collect(),
            ..TopLevelResource::default()
        };
        assert!(volume_drifted(&spec, &observed("local", &[])));
        assert!(!volume_drifted(&spec, &observed("local", &[("type", "tmpfs")])));
    }
}
