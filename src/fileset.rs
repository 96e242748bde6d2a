//! Content-addressed fileset synchronization.
//!
//! A fileset maps a local directory into a path inside a volume. Both
//! sides are summarized as an index of `(path, size, sha256)` entries
//! plus a tree hash over the sorted entries; equal tree hashes mean no
//! work. The remote index is stored in the volume itself and written
//! only after all content operations succeed, so a partial sync is
//! always safe to retry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

pub mod diff;
pub mod index;
pub mod sync;

pub use diff::FilesetDiff;
pub use index::build_local_index;
pub use sync::{FilesetEngine, SyncOutcome};

/// Index format version written by this crate
pub const INDEX_VERSION: &str = "v1";

/// One file entry in an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Slash-normalized path relative to the target
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the contents
    pub sha256: String,
}

/// The local side of a fileset: entries plus their tree hash.
///
/// Building one is a pure function of directory contents and the
/// normalized exclude set; metadata is added only when the index is
/// written into the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIndex {
    /// Normalized exclude patterns in effect
    pub exclude: Vec<String>,
    /// Entries sorted by path
    pub files: Vec<FileEntry>,
    /// SHA-256 over the canonical entry serialization
    pub tree_hash: String,
}

/// The index file stored at `<target_path>/.dockform-index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesetIndex {
    /// Format version
    pub version: String,
    /// Absolute target path inside the volume
    pub target_path: String,
    /// RFC3339 creation time
    pub created_at: String,
    /// Normalized exclude patterns in effect when written
    pub exclude: Vec<String>,
    /// Numeric owner applied to synchronized files
    pub uid: u32,
    /// Numeric group applied to synchronized files
    pub gid: u32,
    /// Entries sorted by path
    pub files: Vec<FileEntry>,
    /// SHA-256 over the canonical entry serialization
    pub tree_hash: String,
}

impl FilesetIndex {
    /// An empty index for a target that has never been synchronized
    #[must_use]
    pub fn empty(target_path: &str) -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            target_path: target_path.to_string(),
            created_at: String::new(),
            exclude: Vec::new(),
            uid: 0,
            gid: 0,
            files: Vec::new(),
            tree_hash: tree_hash(&[]),
        }
    }

    /// Assemble the index to write after a successful sync
    #[must_use]
    pub fn from_local(
        local: &LocalIndex,
        target_path: &str,
        uid: u32,
        gid: u32,
        created_at: String,
    ) -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            target_path: target_path.to_string(),
            created_at,
            exclude: local.exclude.clone(),
            uid,
            gid,
            files: local.files.clone(),
            tree_hash: local.tree_hash.clone(),
        }
    }

    /// Parse a remote index; absent or unparseable input is an empty index
    #[must_use]
    pub fn parse_remote(content: Option<&str>, target_path: &str) -> Self {
        content
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| Self::empty(target_path))
    }

    /// Compact JSON rendering, the bit-exact on-disk form
    ///
    /// # Errors
    ///
    /// `Internal` when serialization fails.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Tree hash over entries already sorted by path: SHA-256 of the
/// concatenation of `path\0size\0hex\n` per entry
#[must_use]
pub fn tree_hash(files: &[FileEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in files {
        hasher.update(entry.path.as_bytes());
        hasher.update([0]);
        hasher.update(entry.size.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(entry.sha256.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

/// Normalize exclude patterns: trailing `/` becomes `/**`, OS separators
/// become `/`, empties are dropped, the result is deduplicated and sorted
#[must_use]
pub fn normalize_excludes(patterns: &[String]) -> Vec<String> {
    let normalized: BTreeSet<String> = patterns
        .iter()
        .map(|pattern| pattern.replace('\\', "/"))
        .map(|pattern| {
            if pattern.ends_with('/') {
                format!("{pattern}**")
            } else {
                pattern
            }
        })
        .filter(|pattern| !pattern.is_empty() && pattern != "**")
        .collect();
    normalized.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64, sha: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            sha256: sha.to_string(),
        }
    }

    #[test]
    fn test_normalize_excludes() {
        let raw = vec![
            "cache/".to_string(),
            String::new(),
            "*.tmp".to_string(),
            "logs\\archive/".to_string(),
            "*.tmp".to_string(),
        ];
        assert_eq!(
            normalize_excludes(&raw),
            vec!["*.tmp", "cache/**", "logs/archive/**"]
        );
    }

    #[test]
    fn test_normalize_excludes_is_idempotent() {
        let raw = vec!["cache/".to_string(), "*.log".to_string()];
        let once = normalize_excludes(&raw);
        let twice = normalize_excludes(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_tree_hash_sensitive_to_entries() {
        let a = vec![entry("a.txt", 3, "aaa")];
        let b = vec![entry("a.txt", 4, "aaa")];
        let c = vec![entry("a.txt", 3, "bbb")];
        assert_ne!(tree_hash(&a), tree_hash(&b));
        assert_ne!(tree_hash(&a), tree_hash(&c));
        assert_eq!(tree_hash(&a), tree_hash(&a.clone()));
    }

    #[test]
    fn test_empty_index_tree_hash_matches_no_entries() {
        let index = FilesetIndex::empty("/app");
        assert_eq!(index.tree_hash, tree_hash(&[]));
    }

    #[test]
    fn test_parse_remote_tolerates_garbage() {
        let garbage = FilesetIndex::parse_remote(Some("not json"), "/app");
        assert_eq!(garbage, FilesetIndex::empty("/app"));
        let missing = FilesetIndex::parse_remote(None, "/app");
        assert_eq!(missing, FilesetIndex::empty("/app"));
    }

    #[test]
    fn test_index_json_field_order() {
        let index = FilesetIndex {
            version: INDEX_VERSION.to_string(),
            target_path: "/app".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            exclude: vec!["*.tmp".to_string()],
            uid: 33,
            gid: 33,
            files: vec![entry("a/b.txt", 123, "ff")],
            tree_hash: "00".to_string(),
        };
        let json = index.to_json().unwrap();
        assert!(json.starts_with(r#"{"version":"v1","target_path":"/app","created_at":"#));
        assert!(json.contains(r#""files":[{"path":"a/b.txt","size":123,"sha256":"ff"}]"#));
        assert!(json.ends_with(r#""tree_hash":"00"}"#));
    }

    #[test]
    fn test_index_json_roundtrip() {
        let index = FilesetIndex::empty("/app");
        let json = index.to_json().unwrap();
        let parsed: FilesetIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, index);
    }
}
