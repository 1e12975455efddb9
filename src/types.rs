//! Core data types used throughout the fim library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Hashing**: [`HashMode`], [`ContentHash`] - which tiers are computed and their digests
//! - **File state**: [`FileTime`], [`FileFingerprint`] - one file at one point in time
//! - **Snapshots**: [`Snapshot`], [`ModificationCounts`] - an immutable record of a whole tree
//! - **Classification**: [`Modification`] - how a fingerprint changed between two snapshots
//! - **Configuration**: [`FimConfig`], [`RepositorySettings`] - persisted settings
//! - **Progress**: [`ProgressInfo`] - callbacks during long scans
//!
//! ## Examples
//!
//! ```rust
//! use fim::types::{ContentHash, FileFingerprint, FileTime, HashMode};
//!
//! let hash = ContentHash::new("small", "medium", "full");
//! let fingerprint = FileFingerprint::new("docs/readme.md", 42, FileTime::new(1_000, 2_000), hash);
//!
//! assert_eq!(fingerprint.last_modified(), 2_000);
//! assert!(HashMode::HashAll > HashMode::HashSmallBlock);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Sentinel stored in a hash tier that was not computed
pub const NO_HASH: &str = "no_hash";

/// Block size sampled by the small-block tier
pub const SMALL_BLOCK_SIZE: u64 = 4 * 1024;

/// Block size sampled by the medium-block tier
pub const MEDIUM_BLOCK_SIZE: u64 = 1024 * 1024;

/// Which hash tiers are computed for each file
///
/// Modes are ordered from cheapest to most thorough. A hash computed under
/// a lower mode is a subset of the information available under a higher one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum HashMode {
    /// No content hash; only name, length and timestamps are recorded
    DontHash,
    /// Sampled 4 KiB blocks
    HashSmallBlock,
    /// Sampled 4 KiB and 1 MiB blocks
    HashMediumBlock,
    /// Every tier, including the full-content hash
    #[default]
    HashAll,
}

impl HashMode {
    /// All modes, cheapest first
    pub const ALL: [HashMode; 4] = [
        HashMode::DontHash,
        HashMode::HashSmallBlock,
        HashMode::HashMediumBlock,
        HashMode::HashAll,
    ];

    /// Short human name used in reports
    pub fn display_name(self) -> &'static str {
        match self {
            HashMode::DontHash => "do not hash",
            HashMode::HashSmallBlock => "super-fast",
            HashMode::HashMediumBlock => "fast",
            HashMode::HashAll => "full",
        }
    }

    /// Whether file content is read at all
    pub fn hashes_content(self) -> bool {
        self != HashMode::DontHash
    }

    /// Whether the small-block tier is computed
    pub fn computes_small_block(self) -> bool {
        self >= HashMode::HashSmallBlock
    }

    /// Whether the medium-block tier is computed
    pub fn computes_medium_block(self) -> bool {
        self >= HashMode::HashMediumBlock
    }

    /// Whether the full-content tier is computed
    pub fn computes_full(self) -> bool {
        self == HashMode::HashAll
    }

    /// Can a repository built with `repository_mode` be checked with `requested`?
    ///
    /// A repository that hashed everything can be checked with any mode. Otherwise
    /// the requested mode may not need tiers the repository never recorded.
    pub fn is_compatible(repository_mode: HashMode, requested: HashMode) -> bool {
        repository_mode == HashMode::HashAll || requested <= repository_mode
    }
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The three tier digests of one file
///
/// Each field is an Ascii85 string, or [`NO_HASH`] when the tier was not computed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHash {
    /// Digest of the sampled 4 KiB blocks
    pub small_block_hash: String,
    /// Digest of the sampled 1 MiB blocks
    pub medium_block_hash: String,
    /// Digest of the whole content
    pub full_hash: String,
}

impl ContentHash {
    /// Build a hash from its three tiers
    pub fn new(
        small_block_hash: impl Into<String>,
        medium_block_hash: impl Into<String>,
        full_hash: impl Into<String>,
    ) -> Self {
        Self {
            small_block_hash: small_block_hash.into(),
            medium_block_hash: medium_block_hash.into(),
            full_hash: full_hash.into(),
        }
    }

    /// A hash where no tier was computed
    pub fn no_hash() -> Self {
        Self::new(NO_HASH, NO_HASH, NO_HASH)
    }

    /// Whether at least one tier holds a real digest
    pub fn is_computed(&self) -> bool {
        self.small_block_hash != NO_HASH
            || self.medium_block_hash != NO_HASH
            || self.full_hash != NO_HASH
    }

    /// Copy of this hash with every tier above `mode` replaced by [`NO_HASH`]
    ///
    /// Used to compare a snapshot recorded with a stricter mode against a scan
    /// made with a cheaper one.
    pub fn restricted_to(&self, mode: HashMode) -> Self {
        let keep = |computed: bool, value: &str| {
            if computed {
                value.to_string()
            } else {
                NO_HASH.to_string()
            }
        };
        Self {
            small_block_hash: keep(mode.computes_small_block(), &self.small_block_hash),
            medium_block_hash: keep(mode.computes_medium_block(), &self.medium_block_hash),
            full_hash: keep(mode.computes_full(), &self.full_hash),
        }
    }
}

/// Creation and modification time of a file, in milliseconds since the epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTime {
    /// Creation time (0 when the platform does not report it)
    pub creation_time: i64,
    /// Last modification time
    pub last_modified: i64,
}

impl FileTime {
    /// Create a file time pair
    pub fn new(creation_time: i64, last_modified: i64) -> Self {
        Self {
            creation_time,
            last_modified,
        }
    }
}

/// Recorded state of a single file inside a snapshot
///
/// Equality (and hashing) only consider `file_name`, `file_length`,
/// `last_modified` and `hash`: two fingerprints that agree on those are the
/// same file state even if their creation time or attributes differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFingerprint {
    /// Path relative to the repository root, `/`-separated
    pub file_name: String,
    /// Length in bytes
    pub file_length: u64,
    /// Timestamps
    pub file_time: FileTime,
    /// Tier digests
    pub hash: ContentHash,
    /// OS-level attributes (for example POSIX permissions)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Classification relative to the previous snapshot, set at commit time
    #[serde(default)]
    pub modification: Option<Modification>,
}

impl FileFingerprint {
    /// Create a fingerprint without attributes
    pub fn new(
        file_name: impl Into<String>,
        file_length: u64,
        file_time: FileTime,
        hash: ContentHash,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_length,
            file_time,
            hash,
            attributes: BTreeMap::new(),
            modification: None,
        }
    }

    /// Attach OS-level attributes
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Last modification time in milliseconds
    pub fn last_modified(&self) -> i64 {
        self.file_time.last_modified
    }

    /// Creation time in milliseconds
    pub fn creation_time(&self) -> i64 {
        self.file_time.creation_time
    }

    /// Feed the persisted fields into a snapshot checksum
    fn update_checksum(&self, hasher: &mut Sha512) {
        hasher.update(self.file_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.file_length.to_le_bytes());
        hasher.update(self.file_time.creation_time.to_le_bytes());
        hasher.update(self.file_time.last_modified.to_le_bytes());
        for tier in [
            &self.hash.small_block_hash,
            &self.hash.medium_block_hash,
            &self.hash.full_hash,
        ] {
            hasher.update(tier.as_bytes());
            hasher.update([0u8]);
        }
        for (key, value) in &self.attributes {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        if let Some(modification) = self.modification {
            hasher.update(modification.label().as_bytes());
        }
        hasher.update([b'\n']);
    }
}

impl PartialEq for FileFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.file_name == other.file_name
            && self.file_length == other.file_length
            && self.file_time.last_modified == other.file_time.last_modified
            && self.hash == other.hash
    }
}

impl Eq for FileFingerprint {}

impl Hash for FileFingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_name.hash(state);
        self.file_length.hash(state);
        self.file_time.last_modified.hash(state);
        self.hash.hash(state);
    }
}

/// How a file changed between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Modification {
    /// New file with content not seen before
    Added,
    /// New file whose content matches a file that was edited in the same comparison
    Copied,
    /// New file whose content matches a file that is still present unchanged
    Duplicated,
    /// Same content, different modification time
    DateModified,
    /// Content changed
    ContentModified,
    /// Only OS-level attributes changed
    AttributesModified,
    /// Same content under a new name, the old name is gone
    Renamed,
    /// File is gone
    Deleted,
    /// Content changed while length and modification time did not
    Corrupted,
}

impl Modification {
    /// All kinds in report order
    pub const ALL: [Modification; 9] = [
        Modification::Added,
        Modification::Copied,
        Modification::Duplicated,
        Modification::DateModified,
        Modification::ContentModified,
        Modification::AttributesModified,
        Modification::Renamed,
        Modification::Deleted,
        Modification::Corrupted,
    ];

    /// Label used in reports
    pub fn label(self) -> &'static str {
        match self {
            Modification::Added => "added",
            Modification::Copied => "copied",
            Modification::Duplicated => "duplicated",
            Modification::DateModified => "date modified",
            Modification::ContentModified => "content modified",
            Modification::AttributesModified => "attrs. modified",
            Modification::Renamed => "renamed",
            Modification::Deleted => "deleted",
            Modification::Corrupted => "corrupted",
        }
    }
}

impl fmt::Display for Modification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Number of differences of each kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationCounts {
    /// Added files
    pub added: usize,
    /// Copied files
    pub copied: usize,
    /// Duplicated files
    pub duplicated: usize,
    /// Date-only changes
    pub date_modified: usize,
    /// Content changes
    pub content_modified: usize,
    /// Attribute-only changes
    pub attributes_modified: usize,
    /// Renamed files
    pub renamed: usize,
    /// Deleted files
    pub deleted: usize,
    /// Suspected corruptions
    pub corrupted: usize,
}

impl ModificationCounts {
    /// Count one more difference of `kind`
    pub fn increment(&mut self, kind: Modification) {
        *self.slot(kind) += 1;
    }

    /// Number of differences of `kind`
    pub fn get(&self, kind: Modification) -> usize {
        match kind {
            Modification::Added => self.added,
            Modification::Copied => self.copied,
            Modification::Duplicated => self.duplicated,
            Modification::DateModified => self.date_modified,
            Modification::ContentModified => self.content_modified,
            Modification::AttributesModified => self.attributes_modified,
            Modification::Renamed => self.renamed,
            Modification::Deleted => self.deleted,
            Modification::Corrupted => self.corrupted,
        }
    }

    /// Sum over every kind
    pub fn total(&self) -> usize {
        Modification::ALL.iter().map(|kind| self.get(*kind)).sum()
    }

    fn slot(&mut self, kind: Modification) -> &mut usize {
        match kind {
            Modification::Added => &mut self.added,
            Modification::Copied => &mut self.copied,
            Modification::Duplicated => &mut self.duplicated,
            Modification::DateModified => &mut self.date_modified,
            Modification::ContentModified => &mut self.content_modified,
            Modification::AttributesModified => &mut self.attributes_modified,
            Modification::Renamed => &mut self.renamed,
            Modification::Deleted => &mut self.deleted,
            Modification::Corrupted => &mut self.corrupted,
        }
    }
}

impl fmt::Display for ModificationCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Modification::ALL
            .iter()
            .filter(|kind| self.get(**kind) > 0)
            .map(|kind| format!("{} {}", self.get(*kind), kind.label()))
            .collect();
        if parts.is_empty() {
            f.write_str("nothing modified")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Immutable record of a whole tree at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Free-text comment
    pub comment: String,
    /// Mode the fingerprints were computed with
    pub hash_mode: HashMode,
    /// Host the scan ran on
    #[serde(default)]
    pub host: String,
    /// Fingerprints ordered by file name
    pub fingerprints: Vec<FileFingerprint>,
    /// Differences against the previous snapshot at commit time
    #[serde(default)]
    pub modification_counts: ModificationCounts,
    /// Sum of all file lengths
    pub content_length_total: u64,
    /// Hex SHA-512 over the fingerprints, filled by [`Snapshot::seal`]
    #[serde(default)]
    pub checksum: String,
}

impl Snapshot {
    /// Create a snapshot, sorting `fingerprints` by name
    pub fn new(
        comment: impl Into<String>,
        hash_mode: HashMode,
        mut fingerprints: Vec<FileFingerprint>,
    ) -> Self {
        fingerprints.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        let content_length_total = fingerprints.iter().map(|f| f.file_length).sum();
        Self {
            timestamp: Utc::now(),
            comment: comment.into(),
            hash_mode,
            host: String::new(),
            fingerprints,
            modification_counts: ModificationCounts::default(),
            content_length_total,
            checksum: String::new(),
        }
    }

    /// Number of files
    pub fn file_count(&self) -> usize {
        self.fingerprints.len()
    }

    /// Look up a fingerprint by its file name
    pub fn get(&self, file_name: &str) -> Option<&FileFingerprint> {
        self.fingerprints
            .binary_search_by(|f| f.file_name.as_str().cmp(file_name))
            .ok()
            .map(|index| &self.fingerprints[index])
    }

    /// First duplicated file name, if any
    ///
    /// Fingerprints are sorted, so duplicates are adjacent.
    pub fn duplicate_file_name(&self) -> Option<&str> {
        self.fingerprints
            .windows(2)
            .find(|pair| pair[0].file_name == pair[1].file_name)
            .map(|pair| pair[0].file_name.as_str())
    }

    /// Hex SHA-512 over every persisted fingerprint field
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha512::new();
        hasher.update(self.comment.as_bytes());
        hasher.update([0u8]);
        for fingerprint in &self.fingerprints {
            fingerprint.update_checksum(&mut hasher);
        }
        hex::encode(hasher.finalize())
    }

    /// Record the checksum; call once the snapshot is final
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Whether the recorded checksum matches the content
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Copy with every fingerprint's hash restricted to `mode`
    ///
    /// Never raises the mode: restricting a `HashSmallBlock` snapshot to
    /// `HashAll` keeps it at `HashSmallBlock`.
    pub fn restricted_to(&self, mode: HashMode) -> Snapshot {
        let effective = mode.min(self.hash_mode);
        let mut restricted = self.clone();
        restricted.hash_mode = effective;
        for fingerprint in &mut restricted.fingerprints {
            fingerprint.hash = fingerprint.hash.restricted_to(effective);
        }
        restricted
    }

    /// Copy containing only the files below `directory` (relative, `/`-separated)
    ///
    /// With `keep_prefix == false` the prefix is stripped from the file names.
    pub fn filter_directory(&self, directory: &str, keep_prefix: bool) -> Snapshot {
        let prefix = format!("{}/", directory.trim_end_matches('/'));
        let mut filtered = self.clone();
        filtered.fingerprints = self
            .fingerprints
            .iter()
            .filter(|f| f.file_name.starts_with(&prefix))
            .map(|f| {
                let mut f = f.clone();
                if !keep_prefix {
                    f.file_name = f.file_name[prefix.len()..].to_string();
                }
                f
            })
            .collect();
        filtered.content_length_total = filtered.fingerprints.iter().map(|f| f.file_length).sum();
        filtered
    }
}

/// Tracking configuration, persisted in the repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FimConfig {
    /// Global hash mode of the repository
    pub hash_mode: HashMode,
    /// Worker threads used for hashing
    pub parallel_workers: usize,
    /// Glob patterns excluded from every scan
    pub ignore_patterns: Vec<String>,
    /// Follow symbolic links while walking
    pub follow_symlinks: bool,
    /// LZ4-compress persisted snapshots
    pub compress_snapshots: bool,
    /// Library version that wrote the settings
    pub version: String,
}

impl Default for FimConfig {
    fn default() -> Self {
        Self {
            hash_mode: HashMode::HashAll,
            parallel_workers: default_parallel_workers(),
            ignore_patterns: Vec::new(),
            follow_symlinks: false,
            compress_snapshots: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Half the logical CPUs, at least one
pub fn default_parallel_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Pointer file content: the latest snapshot number and the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    /// Number of the most recent snapshot (0 when none)
    pub last_snapshot_number: u32,
    /// When the repository was created
    pub created_at: DateTime<Utc>,
    /// Tracking configuration
    pub config: FimConfig,
}

/// Summary of a persisted snapshot, used by `fim log`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Snapshot number
    pub number: u32,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Comment
    pub comment: String,
    /// Hash mode
    pub hash_mode: HashMode,
    /// File count
    pub file_count: usize,
    /// Differences against its predecessor
    pub modification_counts: ModificationCounts,
}

/// Progress information for long-running operations
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current operation
    pub operation: String,
    /// File being processed
    pub current_item: Option<PathBuf>,
    /// Files processed so far
    pub processed: usize,
    /// Total files, if known
    pub total: Option<usize>,
    /// Bytes hashed so far
    pub bytes_processed: u64,
    /// Total bytes, if known
    pub total_bytes: Option<u64>,
}

impl ProgressInfo {
    /// Completion percentage, by bytes when known, else by files
    pub fn percentage(&self) -> Option<f32> {
        match (self.total_bytes, self.total) {
            (Some(total_bytes), _) if total_bytes > 0 => {
                Some(self.bytes_processed as f32 / total_bytes as f32 * 100.0)
            }
            (_, Some(total)) if total > 0 => Some(self.processed as f32 / total as f32 * 100.0),
            _ => None,
        }
    }
}
