//! Property-based testing for fim
//!
//! Uses proptest to verify invariants across randomly generated inputs:
//! sample ranges, digest encoding, hashing and snapshot comparison.

use ::fim::sampler::{sample, BlockSampler};
use ::fim::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

const NO_PROGRESS: Option<fn(ProgressInfo)> = None;

/// Generate random file names, possibly nested
fn file_name_strategy() -> impl Strategy<Value = String> {
    let dirs = prop::collection::vec("[a-z]{1,6}", 0..=3);
    let file = prop_oneof!["file[0-9]{1,3}\\.txt", "[a-z]{3,8}\\.(bin|md|rs)"];
    (dirs, file).prop_map(|(dirs, file)| {
        let mut parts = dirs;
        parts.push(file);
        parts.join("/")
    })
}

/// Generate random file content
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,500}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 0..10_000),
        (any::<u8>(), 1..20_000usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

/// Synthetic snapshot with distinct names
fn snapshot_strategy(mode: HashMode) -> impl Strategy<Value = Snapshot> {
    prop::collection::btree_map(
        file_name_strategy(),
        (0u64..1_000, 0i64..1_000, 0u8..20),
        0..40,
    )
    .prop_map(move |files: BTreeMap<String, (u64, i64, u8)>| {
        let fingerprints = files
            .into_iter()
            .map(|(name, (length, modified, content))| {
                let hash = ContentHash::new(
                    format!("s{}", content),
                    format!("m{}", content),
                    format!("f{}", content),
                )
                .restricted_to(mode);
                FileFingerprint::new(name, length, FileTime::new(0, modified), hash)
            })
            .collect();
        Snapshot::new("generated", mode, fingerprints)
    })
}

fn mode_strategy() -> impl Strategy<Value = HashMode> {
    prop::sample::select(HashMode::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sample_ranges_are_bounded_and_ordered(
        file_length in 0u64..(64 * 1024 * 1024),
        block_size in prop::sample::select(vec![4096u64, 1024 * 1024]),
    ) {
        let ranges = sample(file_length, block_size);
        prop_assert!(!ranges.is_empty());
        prop_assert!(ranges.len() <= 3);
        for range in &ranges {
            prop_assert!(range.to <= file_length);
            prop_assert!(range.from <= range.to);
        }
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].to <= pair[1].from);
        }

        let sampler = BlockSampler::new(file_length, block_size);
        let covered: u64 = ranges.iter().map(|r| r.len()).sum();
        prop_assert_eq!(sampler.size_to_hash(), covered);
        prop_assert!(covered <= file_length);
    }

    #[test]
    fn ascii85_decode_inverts_encode(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let text = ascii85::encode(&bytes);
        prop_assert!(text.bytes().all(|b| (b'!'..=b'u').contains(&b) || b == b'z'));
        prop_assert_eq!(ascii85::decode(&text).unwrap(), bytes);
    }

    #[test]
    fn hashing_is_deterministic_and_mode_restricted(
        content in content_strategy(),
        mode in mode_strategy(),
    ) {
        let hasher = TieredHasher::new(mode);
        let first = hasher.hash_reader(Cursor::new(&content), content.len() as u64).unwrap();
        let second = hasher.hash_reader(Cursor::new(&content), content.len() as u64).unwrap();
        prop_assert_eq!(&first.hash, &second.hash);
        prop_assert!(first.complete);

        let full = TieredHasher::new(HashMode::HashAll)
            .hash_reader(Cursor::new(&content), content.len() as u64)
            .unwrap();
        prop_assert_eq!(full.hash.restricted_to(mode), first.hash);
    }

    #[test]
    fn comparing_a_snapshot_with_itself_finds_nothing(
        (mode, snapshot) in mode_strategy().prop_flat_map(|mode| (Just(mode), snapshot_strategy(mode)))
    ) {
        let result = StateComparator::new(mode).compare(Some(&snapshot), &snapshot);
        prop_assert!(!result.something_modified());
        prop_assert_eq!(result.to_string(), "Nothing modified");
    }

    #[test]
    fn every_file_is_reported_at_most_once(
        (mode, previous, current) in mode_strategy().prop_flat_map(|mode| {
            (Just(mode), snapshot_strategy(mode), snapshot_strategy(mode))
        })
    ) {
        let result = StateComparator::new(mode).compare(Some(&previous), &current);

        // each current file is accounted for at most once
        let mut seen = std::collections::HashSet::new();
        for (kind, difference) in result.entries() {
            if *kind != Modification::Deleted {
                prop_assert!(seen.insert(difference.file_name().to_string()));
                prop_assert!(current.get(difference.file_name()).is_some());
            } else {
                prop_assert!(previous.get(difference.file_name()).is_some());
                prop_assert!(current.get(difference.file_name()).is_none());
            }
        }

        // current files not reported matched the previous state exactly
        for fingerprint in &current.fingerprints {
            if !seen.contains(&fingerprint.file_name) {
                let old = previous.get(&fingerprint.file_name);
                prop_assert!(old.is_some());
            }
        }

        // entries are grouped by kind, names ascending within a kind
        for pair in result.entries().windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.0 < b.0 || (a.0 == b.0 && a.1.file_name() <= b.1.file_name())
            );
        }
        prop_assert_eq!(result.modification_counts().total(), result.modified_count());
    }

    #[test]
    fn duplicate_sets_partition_equal_hashes(
        snapshot in snapshot_strategy(HashMode::HashAll)
    ) {
        let result = DuplicateFinder::find(&snapshot);
        let mut members = 0;
        for set in &result.sets {
            prop_assert!(set.members.len() >= 2);
            prop_assert!(set.members.iter().all(|m| m.hash == set.hash));
            prop_assert!(set.members.windows(2).all(|w| w[0].file_name < w[1].file_name));
            members += set.members.len();
        }
        prop_assert_eq!(result.duplicated_files, members - result.sets.len());
    }
}

mod filesystem {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn committed_tree_has_no_status(
            files in prop::collection::btree_map(file_name_strategy(), content_strategy(), 1..15)
        ) {
            let temp_dir = TempDir::new().unwrap();
            let mut written = 0;
            for (name, content) in &files {
                let path = temp_dir.path().join(name);
                // a generated file name may collide with a generated directory
                if fs::create_dir_all(path.parent().unwrap()).is_err() || path.is_dir() {
                    continue;
                }
                if fs::write(&path, content).is_ok() {
                    written += 1;
                }
            }

            let mut fim = Fim::init(temp_dir.path().to_path_buf()).unwrap();
            fim.commit("generated", NO_PROGRESS).unwrap();
            let snapshot = fim.load_snapshot(1).unwrap();
            prop_assert_eq!(snapshot.file_count(), written);
            prop_assert!(snapshot.verify_checksum());
            prop_assert!(!fim.status(NO_PROGRESS).unwrap().something_modified());
        }

        #[test]
        fn renames_keep_their_content(
            content in prop::collection::vec(any::<u8>(), 1..5_000),
            from in "[a-z]{4,8}",
            to in "[A-Z]{4,8}",
        ) {
            let temp_dir = TempDir::new().unwrap();
            fs::write(temp_dir.path().join(&from), &content).unwrap();
            let mut fim = Fim::init(temp_dir.path().to_path_buf()).unwrap();
            fim.commit("before", NO_PROGRESS).unwrap();

            fs::rename(temp_dir.path().join(&from), temp_dir.path().join(&to)).unwrap();
            let status = fim.status(NO_PROGRESS).unwrap();
            let renamed: Vec<_> = status.of_kind(Modification::Renamed).collect();
            prop_assert_eq!(renamed.len(), 1);
            prop_assert_eq!(renamed[0].previous_file_name(), Some(from.as_str()));
            prop_assert_eq!(status.modified_count(), 1);
        }
    }
}
