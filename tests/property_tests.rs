//! Property-based tests for the pure reconciliation primitives.

use dockform::fileset::{normalize_excludes, tree_hash, FileEntry};
use dockform::manifest::interpolate::{expand_with, Mode};
use proptest::prelude::*;

proptest! {
    #[test]
    fn normalize_excludes_is_idempotent(patterns in proptest::collection::vec("[a-z./*]{0,12}", 0..8)) {
        let once = normalize_excludes(&patterns);
        let twice = normalize_excludes(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalized_excludes_are_sorted_and_slash_only(patterns in proptest::collection::vec("[a-z\\\\./]{0,12}", 0..8)) {
        let normalized = normalize_excludes(&patterns);
        let mut sorted = normalized.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(&normalized, &sorted);
        prop_assert!(normalized.iter().all(|p| !p.contains('\\')));
        prop_assert!(normalized.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn tree_hash_is_order_and_content_sensitive(
        paths in proptest::collection::btree_set("[a-z]{1,8}", 1..6),
        sizes in proptest::collection::vec(0u64..10_000, 6),
    ) {
        let entries: Vec<FileEntry> = paths
            .iter()
            .zip(&sizes)
            .map(|(path, size)| FileEntry {
                path: path.clone(),
                size: *size,
                sha256: format!("{size:x}"),
            })
            .collect();
        let base = tree_hash(&entries);
        // Stable on identical input.
        prop_assert_eq!(&base, &tree_hash(&entries));
        // Any size change moves the hash.
        if let Some(first) = entries.first() {
            let mut changed = entries.clone();
            changed[0] = FileEntry { size: first.size + 1, ..first.clone() };
            prop_assert_ne!(&base, &tree_hash(&changed));
        }
    }

    #[test]
    fn interpolation_without_references_is_identity(text in "[^$]{0,64}") {
        let expanded = expand_with(&text, Mode::Strict, |_| None).unwrap();
        prop_assert_eq!(expanded, text);
    }

    #[test]
    fn lenient_interpolation_never_fails(text in ".{0,64}") {
        prop_assert!(expand_with(&text, Mode::Lenient, |_| None).is_ok());
    }
}
