//! Local index construction.
//!
//! The walk is deterministic: entries are visited in file-name order,
//! symlinks and non-regular files are skipped, paths are slash-normalized
//! relative to the source root, and the final entry list is sorted by
//! path before hashing.

use crate::error::{Error, Result};
use crate::fileset::{tree_hash, FileEntry, LocalIndex};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Build the local index for a source directory.
///
/// `excludes` must already be normalized (the loader does this); the
/// result is a pure function of directory contents and that set.
///
/// # Errors
///
/// `Validation` for unbuildable exclude patterns, `Internal` for I/O.
pub fn build_local_index(source: &Path, excludes: &[String]) -> Result<LocalIndex> {
    let matcher = build_matcher(excludes)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            Error::internal(
                "fileset.index",
                format!("walk failed under {}: {e}", source.display()),
            )
            .with_source(e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::internal("fileset.index", e.to_string()).with_source(e))?;
        let path = slash_normalize(relative);
        if path.is_empty() || matcher.is_match(&path) {
            continue;
        }
        let (size, sha256) = hash_file(entry.path())?;
        files.push(FileEntry { path, size, sha256 });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    let tree_hash = tree_hash(&files);
    Ok(LocalIndex {
        exclude: excludes.to_vec(),
        files,
        tree_hash,
    })
}

fn build_matcher(excludes: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in excludes {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::validation(
                "fileset.excludes",
                format!("invalid exclude pattern {pattern:?}: {e}"),
            )
            .with_source(e)
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::validation("fileset.excludes", e.to_string()).with_source(e))
}

fn slash_normalize(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        Error::internal(
            "fileset.index",
            format!("failed to open {}: {e}", path.display()),
        )
        .with_source(e)
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer).map_err(|e| {
            Error::internal(
                "fileset.index",
                format!("failed to read {}: {e}", path.display()),
            )
            .with_source(e)
        })?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buffer[..read]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::normalize_excludes;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"beta").unwrap();
        fs::write(dir.path().join("sub/c.tmp"), b"scratch").unwrap();
        dir
    }

    #[test]
    fn test_index_entries_sorted_and_normalized() {
        let dir = fixture();
        let index = build_local_index(dir.path(), &[]).unwrap();
        let paths: Vec<&str> = index.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt", "sub/c.tmp"]);
        assert_eq!(index.files[0].size, 5);
    }

    #[test]
    fn test_index_respects_excludes() {
        let dir = fixture();
        let excludes = normalize_excludes(&["*.tmp".to_string()]);
        let index = build_local_index(dir.path(), &excludes).unwrap();
        let paths: Vec<&str> = index.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
    }

    #[test]
    fn test_index_directory_exclude() {
        let dir = fixture();
        let excludes = normalize_excludes(&["sub/".to_string()]);
        let index = build_local_index(dir.path(), &excludes).unwrap();
        let paths: Vec<&str> = index.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt"]);
    }

    #[test]
    fn test_index_is_deterministic() {
        let dir = fixture();
        let one = build_local_index(dir.path(), &[]).unwrap();
        let two = build_local_index(dir.path(), &[]).unwrap();
        assert_eq!(one, two);
        assert_eq!(one.tree_hash, two.tree_hash);
    }

    #[test]
    fn test_index_skips_symlinks() {
        let dir = fixture();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.path().join("a.txt"), dir.path().join("link.txt"))
                .unwrap();
            let index = build_local_index(dir.path(), &[]).unwrap();
            assert!(index.files.iter().all(|f| f.path != "link.txt"));
        }
    }

    #[test]
    fn test_tree_hash_tracks_content_changes() {
        let dir = fixture();
        let before = build_local_index(dir.path(), &[]).unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha2").unwrap();
        let after = build_local_index(dir.path(), &[]).unwrap();
        assert_ne!(before.tree_hash, after.tree_hash);
    }

    #[test]
    fn test_known_sha256() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), b"abc").unwrap();
        let index = build_local_index(dir.path(), &[]).unwrap();
        assert_eq!(
            index.files[0].sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
