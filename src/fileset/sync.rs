//! Fileset synchronization against live volumes.
//!
//! The engine streams a tar patch of created and updated files into the
//! target, deletes removed paths, applies the ownership policy, and only
//! then writes the new index. Writers to the same `(volume, target)`
//! pair are serialized in-process; the index-last rule keeps concurrent
//! external writers idempotent.

use crate::client::{sh_quote, DockerClient};
use crate::command::DockerCommand;
use crate::error::{Error, Result};
use crate::fileset::{build_local_index, FileEntry, FilesetDiff, FilesetIndex, LocalIndex};
use crate::manifest::{Fileset, Manifest};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of synchronizing one fileset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Whether any content changed
    pub changed: bool,
    /// Files created in the volume
    pub created: usize,
    /// Files rewritten in the volume
    pub updated: usize,
    /// Files deleted from the volume
    pub deleted: usize,
    /// Containers restarted by restart propagation; filled by the
    /// standalone fileset path, empty when a plan carries the restarts
    pub restarted: Vec<String>,
}

/// Synchronizes filesets into volumes through helper containers
#[derive(Debug)]
pub struct FilesetEngine {
    client: Arc<DockerClient>,
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FilesetEngine {
    /// Create an engine over the given client
    #[must_use]
    pub fn new(client: Arc<DockerClient>) -> Self {
        Self {
            client,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Build both indexes for a fileset without mutating anything.
    ///
    /// The planner compares the tree hashes; [`sync`](Self::sync) reuses
    /// the same pair to compute the patch.
    ///
    /// # Errors
    ///
    /// `Internal` on walk failure, `External` when the helper fails.
    pub async fn load_indexes(
        &self,
        manifest: &Manifest,
        fileset: &Fileset,
    ) -> Result<(LocalIndex, FilesetIndex)> {
        let source = manifest.base_dir.join(&fileset.source);
        let excludes = fileset.excludes.clone();
        // The walk and hashing are CPU-bound; keep them off the runtime.
        let local = tokio::task::spawn_blocking(move || build_local_index(&source, &excludes))
            .await
            .map_err(|e| Error::internal("fileset.index", format!("walk task failed: {e}")))??;

        let index_path = index_path(&fileset.target_path);
        let raw = self
            .client
            .read_volume_file(&fileset.target_volume, &index_path)
            .await?;
        let remote = FilesetIndex::parse_remote(raw.as_deref(), &fileset.target_path);
        Ok((local, remote))
    }

    /// Synchronize one fileset's content into its target volume.
    ///
    /// Restart propagation is not part of the sync: the planner emits
    /// stop/start actions for `restart_services` targets so a dry run
    /// shows them, and the applier executes those after the sync batch.
    ///
    /// # Errors
    ///
    /// Any failure before the index write leaves the old index intact;
    /// a retry is then a no-op for files that already landed.
    pub async fn sync(
        &self,
        manifest: &Manifest,
        name: &str,
        fileset: &Fileset,
    ) -> Result<SyncOutcome> {
        let _guard = self.lock_target(fileset).await;

        let (local, remote) = self.load_indexes(manifest, fileset).await?;
        let diff = FilesetDiff::between(&local, &remote);
        if diff.is_empty() {
            debug!(fileset = name, "fileset already in sync");
            return Ok(SyncOutcome::default());
        }
        info!(fileset = name, "syncing fileset: {}", diff.summary());

        let volume = &fileset.target_volume;
        let target = &fileset.target_path;

        let upload = diff.upload_set();
        if !upload.is_empty() {
            let archive = build_patch_archive(&manifest.base_dir.join(&fileset.source), &upload)?;
            let mut reader = std::io::Cursor::new(archive);
            self.client
                .extract_tar_to_volume(volume, target, &mut reader)
                .await?;
        }

        if !diff.to_delete.is_empty() {
            self.delete_paths(volume, target, &diff.to_delete).await?;
        }

        let (uid, gid) = self.apply_ownership(fileset, &upload).await?;

        // The new index is the single atomic marker of success.
        let index = FilesetIndex::from_local(
            &local,
            target,
            uid,
            gid,
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        );
        self.write_index(volume, target, &index).await?;

        Ok(SyncOutcome {
            changed: true,
            created: diff.to_create.len(),
            updated: diff.to_update.len(),
            deleted: diff.to_delete.len(),
            restarted: Vec::new(),
        })
    }

    /// Running containers of the services in `restart_services`, sorted
    /// by name. Read-only; the planner turns these into stop/start
    /// actions.
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn restart_targets(
        &self,
        manifest: &Manifest,
        fileset: &Fileset,
    ) -> Result<Vec<String>> {
        let mut targets = Vec::new();
        for service in &fileset.restart_services {
            let project = manifest.stack_project_name(&service.stack);
            let containers = self
                .client
                .ps_json(
                    false,
                    &[
                        format!("label={}={project}", crate::COMPOSE_PROJECT_LABEL),
                        format!("label={}={}", crate::COMPOSE_SERVICE_LABEL, service.service),
                    ],
                )
                .await?;
            targets.extend(containers.into_iter().map(|container| container.name));
        }
        targets.sort();
        targets.dedup();
        Ok(targets)
    }

    /// Restart the running containers of every service in
    /// `restart_services`; returns the restarted container names.
    ///
    /// Used by the standalone fileset path, where no plan carries the
    /// stop/start actions.
    ///
    /// # Errors
    ///
    /// `External` on daemon failure.
    pub async fn restart_services(
        &self,
        manifest: &Manifest,
        fileset: &Fileset,
    ) -> Result<Vec<String>> {
        let targets = self.restart_targets(manifest, fileset).await?;
        for container in &targets {
            info!(container = %container, "restarting after fileset change");
            self.client.restart_container(container).await?;
        }
        Ok(targets)
    }

    async fn delete_paths(&self, volume: &str, target: &str, paths: &[String]) -> Result<()> {
        let dest = volume_target_quoted(target);
        let mut script = format!("cd {dest} || exit 1\n");
        for path in paths {
            script.push_str("rm -f -- ");
            script.push_str(&sh_quote(path));
            script.push('\n');
        }
        // Prune directories emptied by the deletions.
        script.push_str(&format!("find {dest} -mindepth 1 -type d -empty -delete\n"));
        self.client
            .helper()
            .mount(volume, "/target")
            .script(script)
            .execute()
            .await
            .map(drop)
    }

    /// Resolve and apply the ownership policy; returns the numeric ids
    /// recorded in the index
    async fn apply_ownership(
        &self,
        fileset: &Fileset,
        upload: &[FileEntry],
    ) -> Result<(u32, u32)> {
        let ownership = &fileset.ownership;
        let uid = self.resolve_id(ownership.user.as_deref(), "passwd").await?;
        let gid = self.resolve_id(ownership.group.as_deref(), "group").await?;
        if !ownership.is_set() {
            return Ok((uid, gid));
        }

        let volume = &fileset.target_volume;
        let dest = volume_target_quoted(&fileset.target_path);
        let mut script = String::new();

        if ownership.preserve_existing {
            // Only files this sync shipped are touched.
            for entry in upload {
                let path = format!("{}/{}", fileset.target_path.trim_end_matches('/'), entry.path);
                let quoted = sh_quote(&format!("/target{path}"));
                if ownership.user.is_some() || ownership.group.is_some() {
                    script.push_str(&format!("chown {uid}:{gid} {quoted}\n"));
                }
                if let Some(ref mode) = ownership.file_mode {
                    script.push_str(&format!("chmod {mode} {quoted}\n"));
                }
            }
        } else {
            if ownership.user.is_some() || ownership.group.is_some() {
                script.push_str(&format!("chown -R {uid}:{gid} {dest}\n"));
            }
            if let Some(ref mode) = ownership.file_mode {
                script.push_str(&format!("find {dest} -type f -exec chmod {mode} {{}} +\n"));
            }
            if let Some(ref mode) = ownership.dir_mode {
                script.push_str(&format!("find {dest} -type d -exec chmod {mode} {{}} +\n"));
            }
        }

        if script.is_empty() {
            return Ok((uid, gid));
        }
        self.client
            .helper()
            .mount(volume, "/target")
            .script(script)
            .execute()
            .await?;
        Ok((uid, gid))
    }

    /// Resolve a user or group to a numeric id, consulting the helper
    /// image's database for names
    async fn resolve_id(&self, value: Option<&str>, database: &str) -> Result<u32> {
        let Some(value) = value else { return Ok(0) };
        if let Ok(numeric) = value.parse::<u32>() {
            return Ok(numeric);
        }
        let output = self
            .client
            .helper()
            .script(format!(
                "getent {database} {} | cut -d: -f3",
                sh_quote(value)
            ))
            .execute()
            .await?;
        output.stdout.trim().parse().map_err(|_| {
            Error::validation(
                "fileset.ownership",
                format!("unknown {database} entry {value:?} in helper image"),
            )
        })
    }

    async fn write_index(&self, volume: &str, target: &str, index: &FilesetIndex) -> Result<()> {
        let json = index.to_json()?;
        let path = format!("/target{}", index_path(target));
        let tmp = format!("{path}.tmp");
        let script = format!(
            "cat > {tmp_q} && mv {tmp_q} {path_q}",
            tmp_q = sh_quote(&tmp),
            path_q = sh_quote(&path)
        );
        let mut reader = std::io::Cursor::new(json.into_bytes());
        self.client
            .helper()
            .interactive()
            .mount(volume, "/target")
            .script(script)
            .stream_stdin_from(&mut reader)
            .await
    }

    async fn lock_target(&self, fileset: &Fileset) -> tokio::sync::OwnedMutexGuard<()> {
        let key = format!("{}\u{0}{}", fileset.target_volume, fileset.target_path);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }
}

/// Path of the index file relative to the volume root
fn index_path(target: &str) -> String {
    format!(
        "{}/{}",
        target.trim_end_matches('/'),
        crate::FILESET_INDEX_FILE
    )
}

/// The quoted helper-side path of the sync target
fn volume_target_quoted(target: &str) -> String {
    let trimmed = target.trim_start_matches('/');
    if trimmed.is_empty() {
        sh_quote("/target")
    } else {
        sh_quote(&format!("/target/{trimmed}"))
    }
}

/// Pack the upload set into a tar archive rooted at the target
fn build_patch_archive(source: &PathBuf, upload: &[FileEntry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    for entry in upload {
        let local = source.join(&entry.path);
        builder
            .append_path_with_name(&local, &entry.path)
            .map_err(|e| {
                Error::internal(
                    "fileset.patch",
                    format!("failed to pack {}: {e}", local.display()),
                )
                .with_source(e)
            })?;
    }
    builder
        .into_inner()
        .map_err(|e| Error::internal("fileset.patch", e.to_string()).with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::tree_hash;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_index_path() {
        assert_eq!(index_path("/etc/app"), "/etc/app/.dockform-index.json");
        assert_eq!(index_path("/"), "/.dockform-index.json");
    }

    #[test]
    fn test_volume_target_quoted() {
        assert_eq!(volume_target_quoted("/etc/app"), "'/target/etc/app'");
        assert_eq!(volume_target_quoted("/"), "'/target'");
    }

    #[test]
    fn test_patch_archive_contains_upload_set() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"beta").unwrap();
        let upload = vec![
            FileEntry {
                path: "a.txt".to_string(),
                size: 5,
                sha256: String::new(),
            },
            FileEntry {
                path: "sub/b.txt".to_string(),
                size: 4,
                sha256: String::new(),
            },
        ];
        let archive = build_patch_archive(&dir.path().to_path_buf(), &upload).unwrap();

        let mut reader = tar::Archive::new(std::io::Cursor::new(archive));
        let paths: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
    }

    #[test]
    fn test_sync_outcome_default_is_noop() {
        let outcome = SyncOutcome::default();
        assert!(!outcome.changed);
        assert_eq!(outcome.created + outcome.updated + outcome.deleted, 0);
    }

    #[test]
    fn test_diff_short_circuit_via_tree_hash() {
        let files = vec![FileEntry {
            path: "a".to_string(),
            size: 1,
            sha256: "x".to_string(),
        }];
        let local = LocalIndex {
            exclude: Vec::new(),
            files: files.clone(),
            tree_hash: tree_hash(&files),
        };
        let mut remote = FilesetIndex::empty("/app");
        remote.files = files.clone();
        remote.tree_hash = tree_hash(&files);
        assert!(FilesetDiff::between(&local, &remote).is_empty());
    }
}
