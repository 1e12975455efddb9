//! Duplicate grouping
//!
//! Groups the fingerprints of one snapshot by their [`ContentHash`]. Only
//! the tiers computed under the snapshot's mode take part, since the others
//! all hold the same sentinel. Snapshots taken under
//! [`HashMode::DontHash`](crate::types::HashMode::DontHash) have no content
//! information and never produce duplicates.

use crate::collections::group_by;
use crate::types::{ContentHash, FileFingerprint, Snapshot};
use crate::utils::format_bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Files sharing one content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSet {
    /// Shared hash
    pub hash: ContentHash,
    /// Members ordered by file name, at least two
    pub members: Vec<FileFingerprint>,
}

impl DuplicateSet {
    /// Member used for the size of the group
    pub fn representative(&self) -> &FileFingerprint {
        &self.members[0]
    }

    /// Copies beyond the first
    pub fn duplicated_count(&self) -> usize {
        self.members.len() - 1
    }

    /// Bytes that would be freed by keeping a single copy
    pub fn wasted_space(&self) -> u64 {
        self.duplicated_count() as u64 * self.representative().file_length
    }
}

/// Every duplicate set of a snapshot with its totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateResult {
    /// Groups ordered by the name of their first member
    pub sets: Vec<DuplicateSet>,
    /// Σ(group size − 1)
    pub duplicated_files: usize,
    /// Σ(group size − 1) × representative length
    pub wasted_space: u64,
}

impl DuplicateResult {
    /// Whether any duplicate was found
    pub fn has_duplicates(&self) -> bool {
        !self.sets.is_empty()
    }

    /// Every member but the first of each set
    ///
    /// Empty files are never redundant: they carry no content to reclaim
    /// and are often placeholders that tools expect to find.
    pub fn redundant_copies(&self) -> Vec<RedundantCopy> {
        self.sets
            .iter()
            .filter(|set| set.representative().file_length > 0)
            .flat_map(|set| {
                let kept = &set.representative().file_name;
                set.members[1..].iter().map(move |member| RedundantCopy {
                    file_name: member.file_name.clone(),
                    kept: kept.clone(),
                    file_length: member.file_length,
                })
            })
            .collect()
    }
}

impl fmt::Display for DuplicateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sets.is_empty() {
            return f.write_str("No duplicate file found");
        }
        write!(
            f,
            "{} duplicate files in {} sets, {} wasted",
            self.duplicated_files,
            self.sets.len(),
            format_bytes(self.wasted_space)
        )
    }
}

/// A copy whose content also lives in `kept`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundantCopy {
    pub file_name: String,
    pub kept: String,
    pub file_length: u64,
}

/// Outcome of removing redundant copies from the working tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRemoval {
    /// Copies removed, or that would be removed in a dry run
    pub removed: Vec<RedundantCopy>,
    /// Bytes freed
    pub reclaimed_space: u64,
    /// Nothing was deleted
    pub dry_run: bool,
    /// Copies that could not be deleted
    pub warnings: Vec<String>,
}

impl fmt::Display for DuplicateRemoval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.removed.is_empty() {
            return f.write_str("No duplicate file to remove");
        }
        let verb = if self.dry_run { "Would remove" } else { "Removed" };
        write!(
            f,
            "{} {} duplicate files, {} reclaimed",
            verb,
            self.removed.len(),
            format_bytes(self.reclaimed_space)
        )
    }
}

/// Finds duplicate sets in snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateFinder;

impl DuplicateFinder {
    /// Group the fingerprints of `snapshot`
    pub fn find(snapshot: &Snapshot) -> DuplicateResult {
        Self::find_in(&snapshot.fingerprints)
    }

    /// Group an arbitrary list of fingerprints
    pub fn find_in(fingerprints: &[FileFingerprint]) -> DuplicateResult {
        let by_hash = group_by(fingerprints, |f| f.hash.is_computed().then_some(&f.hash));

        let mut sets: Vec<DuplicateSet> = by_hash
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(hash, members)| {
                let mut members: Vec<FileFingerprint> = members.into_iter().cloned().collect();
                members.sort_by(|a, b| a.file_name.cmp(&b.file_name));
                DuplicateSet {
                    hash: hash.clone(),
                    members,
                }
            })
            .collect();
        sets.sort_by(|a, b| {
            a.representative()
                .file_name
                .cmp(&b.representative().file_name)
        });

        let duplicated_files = sets.iter().map(DuplicateSet::duplicated_count).sum();
        let wasted_space = sets.iter().map(DuplicateSet::wasted_space).sum();

        debug!(
            "Found {} duplicate sets ({} duplicated files, {} bytes wasted)",
            sets.len(),
            duplicated_files,
            wasted_space
        );

        DuplicateResult {
            sets,
            duplicated_files,
            wasted_space,
        }
    }
}
