//! Fileset pipeline tests: index, diff and patch over real directories.

use dockform::fileset::{build_local_index, normalize_excludes, FilesetDiff, FilesetIndex};
use std::fs;
use tempfile::TempDir;

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.html"), b"<html></html>").unwrap();
    fs::create_dir_all(dir.path().join("css")).unwrap();
    fs::write(dir.path().join("css/site.css"), b"body {}").unwrap();
    fs::create_dir_all(dir.path().join("cache")).unwrap();
    fs::write(dir.path().join("cache/blob"), b"scratch").unwrap();
    dir
}

#[test]
fn indexes_are_stable_across_runs() {
    let dir = fixture();
    let excludes = normalize_excludes(&["cache/".to_string()]);
    let one = build_local_index(dir.path(), &excludes).unwrap();
    let two = build_local_index(dir.path(), &excludes).unwrap();
    assert_eq!(one, two);

    // The serialized form is byte-identical given identical metadata.
    let json_one = FilesetIndex::from_local(&one, "/srv", 0, 0, "t".to_string())
        .to_json()
        .unwrap();
    let json_two = FilesetIndex::from_local(&two, "/srv", 0, 0, "t".to_string())
        .to_json()
        .unwrap();
    assert_eq!(json_one, json_two);
}

#[test]
fn trailing_slash_excludes_equal_double_star() {
    let dir = fixture();
    let with_slash = build_local_index(dir.path(), &normalize_excludes(&["cache/".to_string()]))
        .unwrap();
    let with_stars =
        build_local_index(dir.path(), &normalize_excludes(&["cache/**".to_string()])).unwrap();
    assert_eq!(with_slash.files, with_stars.files);
    assert_eq!(with_slash.tree_hash, with_stars.tree_hash);
}

#[test]
fn equal_tree_hashes_imply_empty_diff() {
    let dir = fixture();
    let local = build_local_index(dir.path(), &[]).unwrap();
    let remote = FilesetIndex::from_local(&local, "/srv", 0, 0, "earlier".to_string());
    let diff = FilesetDiff::between(&local, &remote);
    assert!(diff.is_empty());
}

#[test]
fn single_file_change_is_a_single_update() {
    let dir = fixture();
    let before = build_local_index(dir.path(), &[]).unwrap();
    let remote = FilesetIndex::from_local(&before, "/srv", 0, 0, "earlier".to_string());

    fs::write(dir.path().join("css/site.css"), b"body { margin: 0 }").unwrap();
    let after = build_local_index(dir.path(), &[]).unwrap();

    let diff = FilesetDiff::between(&after, &remote);
    assert!(diff.to_create.is_empty());
    assert!(diff.to_delete.is_empty());
    assert_eq!(diff.to_update.len(), 1);
    assert_eq!(diff.to_update[0].path, "css/site.css");
}

#[test]
fn deleted_files_appear_only_in_to_delete() {
    let dir = fixture();
    let before = build_local_index(dir.path(), &[]).unwrap();
    let remote = FilesetIndex::from_local(&before, "/srv", 0, 0, "earlier".to_string());

    fs::remove_file(dir.path().join("index.html")).unwrap();
    let after = build_local_index(dir.path(), &[]).unwrap();

    let diff = FilesetDiff::between(&after, &remote);
    assert_eq!(diff.to_delete, vec!["index.html".to_string()]);
    assert!(diff.to_create.is_empty());
    assert!(diff.to_update.is_empty());
}

#[test]
fn remote_index_written_by_older_run_is_readable() {
    // An index written by an earlier release must parse back without loss.
    let raw = r#"{"version":"v1","target_path":"/srv","created_at":"2026-01-01T00:00:00Z","exclude":["*.bak"],"uid":33,"gid":33,"files":[{"path":"index.html","size":13,"sha256":"aa"}],"tree_hash":"bb"}"#;
    let index = FilesetIndex::parse_remote(Some(raw), "/srv");
    assert_eq!(index.uid, 33);
    assert_eq!(index.files.len(), 1);
    assert_eq!(index.tree_hash, "bb");
}
