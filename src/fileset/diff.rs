//! Local vs. remote index diffing.

use crate::fileset::{FileEntry, FilesetIndex, LocalIndex};
use std::collections::BTreeMap;

/// The work implied by comparing a local index against the remote one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesetDiff {
    /// Entries present locally but not remotely
    pub to_create: Vec<FileEntry>,
    /// Entries whose size or hash differs
    pub to_update: Vec<FileEntry>,
    /// Remote paths no longer present locally
    pub to_delete: Vec<String>,
}

impl FilesetDiff {
    /// Compare a local index against the remote index
    #[must_use]
    pub fn between(local: &LocalIndex, remote: &FilesetIndex) -> Self {
        // Equal tree hashes short-circuit: the hash covers path, size and
        // content hash of every entry.
        if local.tree_hash == remote.tree_hash {
            return Self::default();
        }

        let remote_by_path: BTreeMap<&str, &FileEntry> = remote
            .files
            .iter()
            .map(|entry| (entry.path.as_str(), entry))
            .collect();

        let mut diff = Self::default();
        for entry in &local.files {
            match remote_by_path.get(entry.path.as_str()) {
                None => diff.to_create.push(entry.clone()),
                Some(existing) => {
                    if existing.sha256 != entry.sha256 || existing.size != entry.size {
                        diff.to_update.push(entry.clone());
                    }
                }
            }
        }

        let local_paths: BTreeMap<&str, ()> = local
            .files
            .iter()
            .map(|entry| (entry.path.as_str(), ()))
            .collect();
        for entry in &remote.files {
            if !local_paths.contains_key(entry.path.as_str()) {
                diff.to_delete.push(entry.path.clone());
            }
        }

        diff
    }

    /// Whether there is nothing to do
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Entries that must be shipped to the volume
    #[must_use]
    pub fn upload_set(&self) -> Vec<FileEntry> {
        let mut entries = self.to_create.clone();
        entries.extend(self.to_update.iter().cloned());
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// One-line human summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to delete",
            self.to_create.len(),
            self.to_update.len(),
            self.to_delete.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::tree_hash;

    fn entry(path: &str, size: u64, sha: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            sha256: sha.to_string(),
        }
    }

    fn local(files: Vec<FileEntry>) -> LocalIndex {
        let tree_hash = tree_hash(&files);
        LocalIndex {
            exclude: Vec::new(),
            files,
            tree_hash,
        }
    }

    fn remote(files: Vec<FileEntry>) -> FilesetIndex {
        let mut index = FilesetIndex::empty("/app");
        index.tree_hash = tree_hash(&files);
        index.files = files;
        index
    }

    #[test]
    fn test_equal_tree_hashes_mean_empty_diff() {
        let files = vec![entry("a", 1, "x"), entry("b", 2, "y")];
        let diff = FilesetDiff::between(&local(files.clone()), &remote(files));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_create_update_delete_partition() {
        let local = local(vec![
            entry("changed", 2, "new"),
            entry("fresh", 1, "f"),
            entry("same", 3, "s"),
        ]);
        let remote = remote(vec![
            entry("changed", 2, "old"),
            entry("gone", 4, "g"),
            entry("same", 3, "s"),
        ]);
        let diff = FilesetDiff::between(&local, &remote);
        assert_eq!(diff.to_create, vec![entry("fresh", 1, "f")]);
        assert_eq!(diff.to_update, vec![entry("changed", 2, "new")]);
        assert_eq!(diff.to_delete, vec!["gone".to_string()]);
    }

    #[test]
    fn test_size_change_alone_is_an_update() {
        let diff = FilesetDiff::between(
            &local(vec![entry("a", 2, "x")]),
            &remote(vec![entry("a", 1, "x")]),
        );
        assert_eq!(diff.to_update.len(), 1);
    }

    #[test]
    fn test_upload_set_is_sorted_union() {
        let diff = FilesetDiff {
            to_create: vec![entry("z", 1, "z")],
            to_update: vec![entry("a", 1, "a")],
            to_delete: Vec::new(),
        };
        let upload_set = diff.upload_set();
        let upload: Vec<&str> = upload_set.iter().map(|e| e.path.as_str()).collect::<Vec<_>>();
        assert_eq!(upload, vec!["a", "z"]);
    }
}
