//! Volume snapshots: tar+zstd archives with sidecar integrity metadata.
//!
//! Create streams the volume through a helper container into
//! `<out_dir>/<volume>/<timestamp>__spec-<short8>.tar.zst` and writes a
//! sidecar JSON with the archive checksum and the volume's spec hash.
//! Restore is gated: the volume must be declared and present, the
//! archive extension known, the checksum verified, and non-empty or
//! in-use volumes require explicit flags. Containers stopped for the
//! restore are restarted afterwards even when extraction fails, which
//! can mean services resume on partially restored data; the operator
//! message says so.

use crate::client::DockerClient;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Sidecar format version
pub const SIDECAR_VERSION: &str = "v1";

/// Archive checksum block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarChecksum {
    /// Digest algorithm, always `sha256`
    pub algo: String,
    /// Hex digest of the compressed archive
    pub tar_zst: String,
}

/// Snapshot sidecar, stored next to the archive with a `.json` suffix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSidecar {
    /// Format version
    pub version: String,
    /// RFC3339 creation time
    pub created_at: String,
    /// Source volume name
    pub volume: String,
    /// Short digest of the volume's configuration
    pub spec_hash: String,
    /// Volume driver at snapshot time
    pub driver: String,
    /// Driver options at snapshot time
    pub driver_opts: BTreeMap<String, String>,
    /// Labels at snapshot time
    pub labels: BTreeMap<String, String>,
    /// Uncompressed archive size
    pub uncompressed_bytes: u64,
    /// Number of regular files in the volume
    pub file_count: u64,
    /// Archive checksum
    pub checksum: SidecarChecksum,
    /// Operator note, when given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Result of a successful snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Path of the written archive
    pub archive_path: PathBuf,
    /// Path of the written sidecar
    pub sidecar_path: PathBuf,
    /// Short digest of the volume's configuration
    pub spec_hash: String,
    /// Hex digest of the archive
    pub checksum: String,
    /// Uncompressed archive size
    pub uncompressed_bytes: u64,
    /// Number of regular files
    pub file_count: u64,
}

/// Restore options
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Clear a non-empty volume before extraction
    pub force: bool,
    /// Stop containers using the volume for the duration
    pub stop_containers: bool,
}

/// What a restore did to running workloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Containers stopped for the restore
    pub stopped: Vec<String>,
    /// Containers restarted afterwards (those that were running)
    pub restarted: Vec<String>,
}

/// Creates and restores volume snapshots
#[derive(Debug)]
pub struct SnapshotEngine {
    client: Arc<DockerClient>,
}

impl SnapshotEngine {
    /// Create an engine over the given client.
    ///
    /// The engine operates on named volumes directly and must see
    /// unlabeled resources, so identifier scoping is dropped.
    #[must_use]
    pub fn new(client: Arc<DockerClient>) -> Self {
        Self {
            client: Arc::new(client.unscoped()),
        }
    }

    /// Snapshot a volume into `out_dir`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the volume is absent, `Internal` on host I/O,
    /// `External` when the helper container fails.
    pub async fn create(
        &self,
        volume: &str,
        out_dir: &Path,
        note: Option<String>,
    ) -> Result<SnapshotInfo> {
        let details = self.client.inspect_volume(volume).await?;
        let spec_hash = spec_hash(&details.driver, &details.options, &details.labels);
        let created_at = chrono::Utc::now();

        let dir = out_dir.join(volume);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::internal(
                format!("snapshot.create[{volume}]"),
                format!("failed to create {}: {e}", dir.display()),
            )
            .with_source(e)
        })?;

        let stem = format!(
            "{}__spec-{spec_hash}",
            created_at.format("%Y-%m-%dT%H-%M-%SZ")
        );
        let archive_path = dir.join(format!("{stem}.tar.zst"));
        let sidecar_path = dir.join(format!("{stem}.json"));

        let mut file = tokio::fs::File::create(&archive_path).await.map_err(|e| {
            Error::internal(
                format!("snapshot.create[{volume}]"),
                format!("failed to create {}: {e}", archive_path.display()),
            )
            .with_source(e)
        })?;
        self.client
            .stream_tar_zstd_from_volume(volume, &mut file)
            .await?;
        file.sync_all().await.map_err(|e| {
            Error::internal(format!("snapshot.create[{volume}]"), e.to_string()).with_source(e)
        })?;
        drop(file);

        let (uncompressed_bytes, file_count) = self.client.volume_tar_stats(volume).await?;
        let checksum = file_sha256(&archive_path).await?;

        let sidecar = SnapshotSidecar {
            version: SIDECAR_VERSION.to_string(),
            created_at: created_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            volume: volume.to_string(),
            spec_hash: spec_hash.clone(),
            driver: details.driver,
            driver_opts: details.options,
            labels: details.labels,
            uncompressed_bytes,
            file_count,
            checksum: SidecarChecksum {
                algo: "sha256".to_string(),
                tar_zst: checksum.clone(),
            },
            note,
        };
        write_sidecar(&sidecar_path, &sidecar)?;

        info!(volume, archive = %archive_path.display(), "snapshot written");
        Ok(SnapshotInfo {
            archive_path,
            sidecar_path,
            spec_hash,
            checksum,
            uncompressed_bytes,
            file_count,
        })
    }

    /// Restore an archive into a declared volume.
    ///
    /// # Errors
    ///
    /// `Validation` for undeclared volumes, unknown extensions or
    /// checksum mismatch; `Conflict` for non-empty or in-use volumes
    /// without the matching flag; `NotFound` when volume or archive are
    /// absent.
    pub async fn restore(
        &self,
        manifest: &Manifest,
        volume: &str,
        archive: &Path,
        options: RestoreOptions,
    ) -> Result<RestoreReport> {
        let op = format!("snapshot.restore[{volume}]");

        if !manifest.desired_volume_names().contains(volume) {
            return Err(Error::validation(
                op,
                format!("volume {volume} is not declared in the manifest"),
            ));
        }
        if !self.client.volume_exists(volume).await? {
            return Err(Error::not_found(
                op,
                format!("volume {volume} does not exist on the daemon"),
            ));
        }

        let compressed = match archive_format(archive) {
            Some(ArchiveFormat::TarZstd) => true,
            Some(ArchiveFormat::Tar) => false,
            None => {
                return Err(Error::validation(
                    op,
                    format!(
                        "unsupported archive extension: {} (expected .tar or .tar.zst)",
                        archive.display()
                    ),
                ));
            }
        };
        if !archive.is_file() {
            return Err(Error::not_found(
                op,
                format!("archive not found: {}", archive.display()),
            ));
        }

        self.verify_sidecar(volume, archive, &op).await?;

        if !self.client.volume_is_empty(volume).await? && !options.force {
            return Err(Error::conflict(
                op,
                format!("volume {volume} is not empty; pass force to overwrite"),
            ));
        }

        let users = self.client.containers_using_volume(volume, true).await?;
        if !users.is_empty() && !options.stop_containers {
            let names: Vec<&str> = users.iter().map(|c| c.name.as_str()).collect();
            return Err(Error::conflict(
                op,
                format!(
                    "volume {volume} is used by {}; pass stop_containers to proceed",
                    names.join(", ")
                ),
            ));
        }

        let mut report = RestoreReport::default();
        let mut result: Result<()> = Ok(());

        for user in &users {
            if !user.is_running() {
                continue;
            }
            match self.client.stop_container(&user.name).await {
                Ok(()) => {
                    report.stopped.push(user.name.clone());
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if result.is_ok() {
            result = self
                .extract(volume, archive, compressed, options.force)
                .await;
        }

        // The deferred restart always fires. When extraction failed this
        // resumes services on partially restored data; the propagated
        // error tells the operator exactly that.
        for container in &report.stopped {
            match self.client.start_container(container).await {
                Ok(()) => report.restarted.push(container.clone()),
                Err(e) => {
                    warn!(container = %container, error = %e, "deferred restart failed");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }

        result.map_err(|e| {
            e.in_op(format!(
                "snapshot.restore[{volume}] (stopped containers were restarted; \
                 data may be partially restored)"
            ))
        })?;
        Ok(report)
    }

    async fn verify_sidecar(&self, volume: &str, archive: &Path, op: &str) -> Result<()> {
        let Some(sidecar_path) = sidecar_path_for(archive) else {
            return Ok(());
        };
        if !sidecar_path.is_file() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&sidecar_path).map_err(|e| {
            Error::internal(op.to_string(), format!("failed to read sidecar: {e}")).with_source(e)
        })?;
        let sidecar: SnapshotSidecar = serde_json::from_str(&raw).map_err(|e| {
            Error::validation(op.to_string(), format!("unparseable sidecar: {e}")).with_source(e)
        })?;

        let checksum = file_sha256(archive).await?;
        if checksum != sidecar.checksum.tar_zst {
            return Err(Error::validation(
                op.to_string(),
                format!(
                    "archive checksum mismatch: sidecar says {}, file is {checksum}",
                    sidecar.checksum.tar_zst
                ),
            ));
        }

        let details = self.client.inspect_volume(volume).await?;
        let current = spec_hash(&details.driver, &details.options, &details.labels);
        if current != sidecar.spec_hash {
            warn!(
                volume,
                snapshot_spec = %sidecar.spec_hash,
                current_spec = %current,
                "volume configuration differs from snapshot; restoring anyway"
            );
        }
        Ok(())
    }

    async fn extract(
        &self,
        volume: &str,
        archive: &Path,
        compressed: bool,
        force: bool,
    ) -> Result<()> {
        if force {
            self.client.clear_volume(volume).await?;
        }
        let mut file = tokio::fs::File::open(archive).await.map_err(|e| {
            Error::internal(
                format!("snapshot.restore[{volume}]"),
                format!("failed to open {}: {e}", archive.display()),
            )
            .with_source(e)
        })?;
        if compressed {
            self.client
                .extract_tar_zstd_to_volume(volume, "/", &mut file)
                .await
        } else {
            self.client.extract_tar_to_volume(volume, "/", &mut file).await
        }
    }
}

/// Recognized archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Tar,
    TarZstd,
}

fn archive_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_string_lossy();
    if name.ends_with(".tar.zst") {
        Some(ArchiveFormat::TarZstd)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else {
        None
    }
}

/// Sidecar path for an archive: same stem, `.json` suffix
fn sidecar_path_for(archive: &Path) -> Option<PathBuf> {
    let name = archive.file_name()?.to_string_lossy();
    let stem = name
        .strip_suffix(".tar.zst")
        .or_else(|| name.strip_suffix(".tar"))?;
    Some(archive.with_file_name(format!("{stem}.json")))
}

/// Short digest of a volume's configuration:
/// `driver=<d>|opts=<k=v;…sorted>|labels=<k=v;…sorted>`
#[must_use]
pub fn spec_hash(
    driver: &str,
    options: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> String {
    let join = |map: &BTreeMap<String, String>| {
        map.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    };
    let input = format!(
        "driver={driver}|opts={}|labels={}",
        join(options),
        join(labels)
    );
    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest[..8].to_string()
}

/// SHA-256 of a file on disk, off the async runtime
async fn file_sha256(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path).map_err(|e| {
            Error::internal(
                "snapshot.checksum",
                format!("failed to open {}: {e}", path.display()),
            )
            .with_source(e)
        })?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| Error::internal("snapshot.checksum", e.to_string()).with_source(e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| Error::internal("snapshot.checksum", format!("hash task failed: {e}")))?
}

/// Write the sidecar atomically: temp file in the same directory, then
/// rename over the final path
fn write_sidecar(path: &Path, sidecar: &SnapshotSidecar) -> Result<()> {
    let json = serde_json::to_string_pretty(sidecar)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        Error::internal("snapshot.sidecar", e.to_string()).with_source(e)
    })?;
    std::io::Write::write_all(&mut tmp, json.as_bytes())
        .map_err(|e| Error::internal("snapshot.sidecar", e.to_string()).with_source(e))?;
    tmp.persist(path)
        .map_err(|e| Error::internal("snapshot.sidecar", e.to_string()).with_source(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_hash_shape_and_stability() {
        let options: BTreeMap<String, String> =
            [("o".to_string(), "bind".to_string())].into_iter().collect();
        let labels = BTreeMap::new();
        let digest = spec_hash("local", &options, &labels);
        assert_eq!(digest.len(), 8);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, spec_hash("local", &options, &labels));
        assert_ne!(digest, spec_hash("nfs", &options, &labels));
        assert_ne!(digest, spec_hash("local", &BTreeMap::new(), &labels));
    }

    #[test]
    fn test_archive_format_detection() {
        assert_eq!(
            archive_format(Path::new("/x/a.tar.zst")),
            Some(ArchiveFormat::TarZstd)
        );
        assert_eq!(archive_format(Path::new("/x/a.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(archive_format(Path::new("/x/a.tgz")), None);
    }

    #[test]
    fn test_sidecar_path_for() {
        assert_eq!(
            sidecar_path_for(Path::new("/x/v/t__spec-ab.tar.zst")),
            Some(PathBuf::from("/x/v/t__spec-ab.json"))
        );
        assert_eq!(
            sidecar_path_for(Path::new("/x/v/t.tar")),
            Some(PathBuf::from("/x/v/t.json"))
        );
        assert_eq!(sidecar_path_for(Path::new("/x/v/t.tgz")), None);
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let sidecar = SnapshotSidecar {
            version: SIDECAR_VERSION.to_string(),
            created_at: "2026-08-01T00:00:00Z".to_string(),
            volume: "data".to_string(),
            spec_hash: "deadbeef".to_string(),
            driver: "local".to_string(),
            driver_opts: BTreeMap::new(),
            labels: BTreeMap::new(),
            uncompressed_bytes: 42,
            file_count: 3,
            checksum: SidecarChecksum {
                algo: "sha256".to_string(),
                tar_zst: "ff".to_string(),
            },
            note: None,
        };
        let json = serde_json::to_string(&sidecar).unwrap();
        assert!(!json.contains("note"));
        let parsed: SnapshotSidecar = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sidecar);
    }

    #[tokio::test]
    async fn test_file_sha256_known_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
