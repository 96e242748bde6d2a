//! Network planning.
//!
//! Networks cannot be mutated in place: any difference in driver,
//! options, IPAM configuration or the attachable/internal/ipv6 flags
//! forces a remove-and-recreate with attached containers bounced.

use crate::client::DockerClient;
use crate::command::network::NetworkDetails;
use crate::error::{Error, Kind, Result};
use crate::manifest::{Manifest, TopLevelResource};
use crate::planner::{retry, Action, Plan};

pub(crate) async fn plan_networks(
    manifest: &Manifest,
    client: &DockerClient,
    plan: &mut Plan,
) -> Result<()> {
    for (name, spec) in &manifest.networks {
        let observed = match retry::with_retries(|| client.inspect_network(name)).await {
            Ok(details) => Some(details),
            Err(e) if e.kind() == Kind::NotFound => None,
            Err(e) => return Err(e.in_op("plan.networks")),
        };

        if spec.external {
            match observed {
                Some(_) => plan.push(Action::Noop {
                    resource: format!("network {name}"),
                    reason: "external, exists".to_string(),
                }),
                None => {
                    return Err(Error::not_found(
                        "plan.networks",
                        format!("external network {name} does not exist"),
                    ));
                }
            }
            continue;
        }

        match observed {
            None => plan.push(Action::CreateNetwork { name: name.clone() }),
            Some(details) if network_drifted(spec, &details) => {
                plan.push(Action::RecreateNetwork { name: name.clone() });
            }
            Some(_) => plan.push(Action::Noop {
                resource: format!("network {name}"),
                reason: "up to date".to_string(),
            }),
        }
    }
    Ok(())
}

/// Whether the observed network differs from the declaration
pub(crate) fn network_drifted(spec: &TopLevelResource, observed: &NetworkDetails) -> bool {
    if let Some(ref driver) = spec.driver {
        if *driver != observed.driver {
            return true;
        }
    }
    if !spec.options.is_empty() && spec.options != observed.options {
        return true;
    }
    if spec.attachable != observed.attachable
        || spec.internal != observed.internal
        || spec.ipv6 != observed.ipv6
    {
        return true;
    }

    let ipam = observed.ipam.config.first();
    if let Some(ref subnet) = spec.subnet {
        if ipam.and_then(|c| c.subnet.as_ref()) != Some(subnet) {
            return true;
        }
    }
    if let Some(ref gateway) = spec.gateway {
        if ipam.and_then(|c| c.gateway.as_ref()) != Some(gateway) {
            return true;
        }
    }
    if let Some(ref range) = spec.ip_range {
        if ipam.and_then(|c| c.ip_range.as_ref()) != Some(range) {
            return true;
        }
    }
    if !spec.aux_addresses.is_empty()
        && ipam.map(|c| &c.aux_addresses) != Some(&spec.aux_addresses)
    {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::network::{IpamConfig, NetworkIpam};
    use std::collections::BTreeMap;

    fn observed(subnet: Option<&str>) -> NetworkDetails {
        NetworkDetails {
            name: "frontend".to_string(),
            driver: "bridge".to_string(),
            ipv6: false,
            internal: false,
            attachable: false,
            ipam: NetworkIpam {
                driver: "default".to_string(),
                config: subnet
                    .map(|s| {
                        vec![IpamConfig {
                            subnet: Some(s.to_string()),
                            ..IpamConfig::default()
                        }]
                    })
                    .unwrap_or_default(),
            },
            options: BTreeMap::new(),
            labels: BTreeMap::new(),
            containers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_spec_matches_default_network() {
        let spec = TopLevelResource::default();
        assert!(!network_drifted(&spec, &observed(None)));
    }

    #[test]
    fn test_subnet_mismatch_drifts() {
        let spec = TopLevelResource {
            subnet: Some("10.0.0.0/16".to_string()),
            ..TopLevelResource::default()
        };
        assert!(network_drifted(&spec, &observed(None)));
        assert!(network_drifted(&spec, &observed(Some("10.1.0.0/16"))));
        assert!(!network_drifted(&spec, &observed(Some("10.0.0.0/16"))));
    }

    #[test]
    fn test_flag_mismatch_drifts() {
        let spec = TopLevelResource {
            attachable: true,
            ..TopLevelResource::default()
        };
        assert!(network_drifted(&spec, &observed(None)));
    }

    #[test]
    fn test_driver_mismatch_drifts() {
        let spec = TopLevelResource {
            driver: Some("overlay".to_string()),
            ..TopLevelResource::default()
        };
        assert!(network_drifted(&spec, &observed(None)));
    }
}
