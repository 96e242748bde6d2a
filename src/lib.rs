//! # dockform
//!
//! Declarative reconciliation core for Docker Compose deployments.
//!
//! A manifest describes the desired set of stacks (compose projects),
//! named volumes, named networks and filesets; this crate interrogates
//! the daemon, computes a structured diff, and executes it with careful
//! ordering and partial-failure recovery. Filesets synchronize local
//! directories into volumes through a content-addressed index; the
//! snapshot engine streams tar+zstd archives with sidecar integrity
//! metadata.
//!
//! ## Architecture
//!
//! - [`manifest`] - declarative input model, loading and validation
//! - [`client`] - typed façade over the docker CLI
//! - [`overlay`] - labeled compose overlay so identity survives hashing
//! - [`planner`] - desired vs. observed diff as an ordered, typed plan
//! - [`applier`] - plan execution with recovery groups and progress events
//! - [`fileset`] - content-addressed directory synchronization
//! - [`snapshot`] - volume backup and gated restore
//! - [`ops`] - the operations a CLI shell binds to
//! - [`error`] - kinded errors with stable exit codes

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub use client::{ClientConfig, ClientFactory, DockerClient, NetworkOptions, VolumeOptions};
pub use error::{Error, Kind, Result};
pub use manifest::Manifest;
pub use planner::{Action, Plan};

pub mod applier;
pub mod client;
pub mod command;
pub mod compose;
pub mod error;
pub mod fileset;
pub mod manifest;
pub mod ops;
pub mod overlay;
pub mod planner;
pub mod snapshot;

mod stream;

/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Label stamped on every managed resource
pub const IDENTIFIER_LABEL: &str = "io.dockform.identifier";

/// Legacy ownership label prefix, recognized read-only and never emitted
pub const LEGACY_IDENTIFIER_PREFIX: &str = "io.dockform/";

/// Compose project label, consumed but never written
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Compose service label, consumed but never written
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Compose config-hash label, the drift oracle for services
pub const COMPOSE_CONFIG_HASH_LABEL: &str = "com.docker.compose.config-hash";

/// Image used for helper containers (`sh`, `tar`, `find`; zstd on demand)
pub const HELPER_IMAGE: &str = "alpine:3";

/// Minimum supported compose plugin version
pub const MIN_COMPOSE_VERSION: &str = "2.23.0";

/// Default per-command timeout
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Timeout for `compose up -d`, which may pull images
pub const COMPOSE_UP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);

/// Timeout for container listing
pub const PS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Default capacity of the resolved compose document cache
pub const COMPOSE_CACHE_CAPACITY: usize = 100;

/// Name of the fileset index file inside a target volume
pub const FILESET_INDEX_FILE: &str = ".dockform-index.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_constants() {
        assert_eq!(IDENTIFIER_LABEL, "io.dockform.identifier");
        assert!(LEGACY_IDENTIFIER_PREFIX.ends_with('/'));
    }

    #[test]
    fn test_timeouts_ordered() {
        assert!(PS_TIMEOUT < DEFAULT_TIMEOUT);
        assert!(DEFAULT_TIMEOUT < COMPOSE_UP_TIMEOUT);
    }
}
