//! State comparison
//!
//! [`StateComparator`] reconciles a previous snapshot with a current one and
//! classifies every fingerprint that changed into one [`Modification`] kind.
//!
//! ## Classification order
//!
//! 1. Fingerprints equal on `(file_name, file_length, last_modified, hash)`
//!    are unchanged, unless their OS attributes differ (`attributesModified`).
//! 2. A remaining fingerprint whose name exists in the previous snapshot is
//!    `dateModified` when only the timestamp moved, `contentModified`
//!    otherwise. Name matches always win over hash matches.
//! 3. When content hashes are available, a fingerprint whose hash matches a
//!    previous entry is `renamed` (the original name is gone), `copied` (the
//!    original was edited in this comparison) or `duplicated` (the original
//!    is still there, unchanged).
//! 4. Anything else is `added`; previous entries never matched are `deleted`.
//!
//! In corruption search a `contentModified` candidate whose length and
//! modification time are both unchanged is reported as `corrupted`.
//!
//! ```rust
//! use fim::comparator::StateComparator;
//! use fim::types::{ContentHash, FileFingerprint, FileTime, HashMode, Modification, Snapshot};
//!
//! let file = |name: &str, hash: &str| {
//!     FileFingerprint::new(name, 3, FileTime::new(0, 10), ContentHash::new(hash, hash, hash))
//! };
//! let previous = Snapshot::new("", HashMode::HashAll, vec![file("a", "x")]);
//! let current = Snapshot::new("", HashMode::HashAll, vec![file("b", "x")]);
//!
//! let result = StateComparator::new(HashMode::HashAll).compare(Some(&previous), &current);
//! assert_eq!(result.of_kind(Modification::Renamed).count(), 1);
//! ```

use crate::collections::{first_positions, HashMap, HashMapExt};
use crate::error::{FimError, Result};
use crate::types::{
    ContentHash, FileFingerprint, HashMode, Modification, ModificationCounts, Snapshot,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument, trace};

/// One changed file: its previous state, its current state, or both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    /// State in the previous snapshot (absent for added files)
    pub previous: Option<FileFingerprint>,
    /// State in the current snapshot (absent for deleted files)
    pub current: Option<FileFingerprint>,
}

impl Difference {
    fn new(previous: Option<&FileFingerprint>, current: Option<&FileFingerprint>) -> Self {
        debug_assert!(previous.is_some() || current.is_some());
        Self {
            previous: previous.cloned(),
            current: current.cloned(),
        }
    }

    /// Name the difference is reported under: the current one when present
    pub fn file_name(&self) -> &str {
        self.current
            .as_ref()
            .or(self.previous.as_ref())
            .map(|f| f.file_name.as_str())
            .unwrap_or_default()
    }

    /// Previous name, for renames and copies
    pub fn previous_file_name(&self) -> Option<&str> {
        self.previous.as_ref().map(|f| f.file_name.as_str())
    }

    /// Whether both sides exist and their modification times differ
    pub fn last_modified_changed(&self) -> bool {
        match (&self.previous, &self.current) {
            (Some(previous), Some(current)) => previous.last_modified() != current.last_modified(),
            _ => false,
        }
    }

    /// Whether both sides exist and their creation times differ
    pub fn creation_time_changed(&self) -> bool {
        match (&self.previous, &self.current) {
            (Some(previous), Some(current)) => previous.creation_time() != current.creation_time(),
            _ => false,
        }
    }
}

/// Outcome of one comparison
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareResult {
    entries: Vec<(Modification, Difference)>,
    hash_mode: HashMode,
    search_for_corruption: bool,
}

impl CompareResult {
    /// Every difference, grouped by kind and ordered by file name
    pub fn entries(&self) -> &[(Modification, Difference)] {
        &self.entries
    }

    /// Differences of one kind, ordered by file name
    pub fn of_kind(&self, kind: Modification) -> impl Iterator<Item = &Difference> {
        self.entries
            .iter()
            .filter(move |(k, _)| *k == kind)
            .map(|(_, difference)| difference)
    }

    /// Mode the comparison ran with
    pub fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    /// Whether this result comes from a corruption search
    pub fn is_search_for_corruption(&self) -> bool {
        self.search_for_corruption
    }

    /// Count of each kind
    pub fn modification_counts(&self) -> ModificationCounts {
        let mut counts = ModificationCounts::default();
        for (kind, _) in &self.entries {
            counts.increment(*kind);
        }
        counts
    }

    /// Number of differences
    pub fn modified_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether anything changed at all
    pub fn something_modified(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Record the classification on the current snapshot's fingerprints and
    /// store the counts in the snapshot
    pub fn annotate(&self, snapshot: &mut Snapshot) {
        for (kind, difference) in &self.entries {
            let Some(current) = &difference.current else {
                continue;
            };
            if let Ok(index) = snapshot
                .fingerprints
                .binary_search_by(|f| f.file_name.cmp(&current.file_name))
            {
                snapshot.fingerprints[index].modification = Some(*kind);
            }
        }
        snapshot.modification_counts = self.modification_counts();
    }
}

impl fmt::Display for CompareResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.something_modified() {
            return if self.search_for_corruption {
                f.write_str("Nothing corrupted")
            } else {
                f.write_str("Nothing modified")
            };
        }
        write!(f, "{}", self.modification_counts())
    }
}

/// Compares snapshots under one hash mode
#[derive(Debug, Clone, Copy)]
pub struct StateComparator {
    hash_mode: HashMode,
    search_for_corruption: bool,
}

impl StateComparator {
    /// Comparator matching content by hash whenever `hash_mode` computes one
    pub fn new(hash_mode: HashMode) -> Self {
        Self {
            hash_mode,
            search_for_corruption: false,
        }
    }

    /// Switch to corruption search
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] unless the mode is [`HashMode::HashAll`]: sampled
    /// tiers cannot rule out damage outside their ranges.
    pub fn search_for_corruption(mut self) -> Result<Self> {
        if self.hash_mode != HashMode::HashAll {
            return Err(FimError::usage(format!(
                "corruption detection needs the '{}' hash mode, not '{}'",
                HashMode::HashAll,
                self.hash_mode
            )));
        }
        self.search_for_corruption = true;
        Ok(self)
    }

    /// Mode this comparator matches hashes with
    pub fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    /// Classify every change from `previous` to `current`
    ///
    /// Without a previous snapshot every current file is `added`.
    ///
    /// # Panics
    ///
    /// Panics if a file name occurs twice in either snapshot.
    #[instrument(skip_all, fields(current = current.file_count()))]
    pub fn compare(&self, previous: Option<&Snapshot>, current: &Snapshot) -> CompareResult {
        let previous_files: &[FileFingerprint] =
            previous.map_or(&[][..], |s| s.fingerprints.as_slice());
        assert_unique_names(previous_files, "previous");
        assert_unique_names(&current.fingerprints, "current");

        let by_name = first_positions(previous_files, |f| f.file_name.as_str());

        // previous entries nothing in `current` has claimed yet
        let mut unmatched = vec![true; previous_files.len()];
        // previous entries whose content was edited in this comparison
        let mut content_changed = vec![false; previous_files.len()];
        let mut entries: Vec<(Modification, Difference)> = Vec::new();
        let mut remaining: Vec<&FileFingerprint> = Vec::new();

        for fingerprint in &current.fingerprints {
            match by_name.get(fingerprint.file_name.as_str()) {
                Some(&index) if previous_files[index] == *fingerprint => {
                    unmatched[index] = false;
                    let original = &previous_files[index];
                    if original.attributes != fingerprint.attributes {
                        entries.push((
                            Modification::AttributesModified,
                            Difference::new(Some(original), Some(fingerprint)),
                        ));
                    }
                }
                _ => remaining.push(fingerprint),
            }
        }

        let mut unnamed: Vec<&FileFingerprint> = Vec::with_capacity(remaining.len());
        for fingerprint in remaining {
            let Some(&index) = by_name.get(fingerprint.file_name.as_str()) else {
                unnamed.push(fingerprint);
                continue;
            };
            unmatched[index] = false;
            let original = &previous_files[index];
            let kind = if original.hash == fingerprint.hash
                && original.last_modified() != fingerprint.last_modified()
            {
                Modification::DateModified
            } else {
                content_changed[index] = true;
                if self.is_corrupted(original, fingerprint) {
                    Modification::Corrupted
                } else {
                    Modification::ContentModified
                }
            };
            trace!("{}: {}", fingerprint.file_name, kind);
            entries.push((kind, Difference::new(Some(original), Some(fingerprint))));
        }

        let by_hash = self.hash_index(previous_files);
        for fingerprint in unnamed {
            let original = by_hash
                .as_ref()
                .filter(|_| fingerprint.hash.is_computed())
                .and_then(|index| index.get(&fingerprint.hash))
                .copied();

            let Some(index) = original else {
                entries.push((Modification::Added, Difference::new(None, Some(fingerprint))));
                continue;
            };

            let kind = if unmatched[index] {
                unmatched[index] = false;
                Modification::Renamed
            } else if content_changed[index] {
                Modification::Copied
            } else {
                Modification::Duplicated
            };
            trace!("{}: {} from {}", fingerprint.file_name, kind, previous_files[index].file_name);
            entries.push((kind, Difference::new(Some(&previous_files[index]), Some(fingerprint))));
        }

        for (index, original) in previous_files.iter().enumerate() {
            if unmatched[index] {
                entries.push((Modification::Deleted, Difference::new(Some(original), None)));
            }
        }

        entries.sort_by(|(kind_a, a), (kind_b, b)| {
            kind_a.cmp(kind_b).then_with(|| a.file_name().cmp(b.file_name()))
        });

        let result = CompareResult {
            entries,
            hash_mode: self.hash_mode,
            search_for_corruption: self.search_for_corruption,
        };
        debug!("Comparison done: {}", result);
        result
    }

    fn is_corrupted(&self, original: &FileFingerprint, current: &FileFingerprint) -> bool {
        self.search_for_corruption
            && original.last_modified() == current.last_modified()
            && original.file_length == current.file_length
            && original.hash.full_hash != current.hash.full_hash
    }

    /// First previous entry for every hash, or `None` when hashes are off
    fn hash_index<'a>(
        &self,
        previous_files: &'a [FileFingerprint],
    ) -> Option<HashMap<&'a ContentHash, usize>> {
        if !self.hash_mode.hashes_content() {
            return None;
        }
        Some(first_positions(previous_files, |f| &f.hash))
    }
}

fn assert_unique_names(fingerprints: &[FileFingerprint], which: &str) {
    let mut seen: HashMap<&str, ()> = HashMap::with_capacity(fingerprints.len());
    for fingerprint in fingerprints {
        assert!(
            seen.insert(fingerprint.file_name.as_str(), ()).is_none(),
            "file name {:?} occurs twice in the {} snapshot",
            fingerprint.file_name,
            which
        );
    }
}
