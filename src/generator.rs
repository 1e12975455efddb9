//! Snapshot generation
//!
//! [`SnapshotGenerator`] walks the tracked tree on the calling thread, then
//! hashes every file on a bounded rayon pool. Each worker returns its
//! [`FileFingerprint`] by value; the fingerprints are sorted by name once all
//! workers are done, so consumers never see scan order.
//!
//! ## Ignore rules
//!
//! - `.gitignore` and `.fimignore` files anywhere in the tree (gitignore
//!   syntax, nested files refine their parents)
//! - The repository and VCS directories: `.fim`, `.git`, `.svn`, `.cvs`
//! - Configured glob patterns, checked through an [`IgnorePredicate`] right
//!   before a file would be hashed
//!
//! ## Failures
//!
//! A file that cannot be read is logged and left out of the snapshot; the
//! scan carries on with the rest of the tree.
//!
//! ```rust,no_run
//! use fim::generator::SnapshotGenerator;
//! use fim::types::HashMode;
//!
//! # fn main() -> fim::Result<()> {
//! let generator = SnapshotGenerator::new("./project", HashMode::HashMediumBlock)
//!     .with_parallel_workers(4)
//!     .with_ignore_patterns(&["*.log".to_string(), "target/".to_string()])?;
//!
//! let snapshot = generator.generate("nightly", None::<fn(fim::ProgressInfo)>)?;
//! println!("{} files", snapshot.file_count());
//! # Ok(())
//! # }
//! ```

use crate::error::{FimError, Result};
use crate::hasher::TieredHasher;
use crate::types::{FileFingerprint, HashMode, ProgressInfo, Snapshot};
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// Name of the per-directory ignore file
pub const IGNORE_FILE_NAME: &str = ".fimignore";

/// Directories never walked
pub const EXCLUDED_DIRECTORIES: [&str; 4] = [".fim", ".git", ".svn", ".cvs"];

/// Decides whether a file stays out of snapshots
///
/// `relative_path` is `/`-separated and relative to the tracked root.
pub trait IgnorePredicate: Send + Sync {
    /// `true` to leave the file out
    fn is_ignored(&self, relative_path: &str) -> bool;
}

impl<F> IgnorePredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ignored(&self, relative_path: &str) -> bool {
        self(relative_path)
    }
}

/// [`IgnorePredicate`] backed by glob patterns
///
/// A pattern without `/` matches at any depth (`*.log`, `build`). A trailing
/// `/` marks a directory: everything below it is ignored.
#[derive(Debug, Clone)]
pub struct GlobIgnore {
    patterns: Vec<String>,
    set: GlobSet,
}

impl GlobIgnore {
    /// Compile `patterns`
    ///
    /// # Errors
    ///
    /// [`FimError::InvalidPattern`] if a pattern is not a valid glob.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let trimmed = pattern.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let anchored = trimmed.trim_start_matches('/');
            let bases: Vec<String> = if trimmed.contains('/') {
                vec![anchored.to_string()]
            } else {
                vec![anchored.to_string(), format!("**/{}", anchored)]
            };
            for base in bases {
                builder.add(Glob::new(&base)?);
                builder.add(Glob::new(&format!("{}/**", base))?);
            }
        }

        Ok(Self {
            patterns: patterns.to_vec(),
            set: builder.build()?,
        })
    }

    /// Source patterns
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl IgnorePredicate for GlobIgnore {
    fn is_ignored(&self, relative_path: &str) -> bool {
        self.set.is_match(relative_path)
    }
}

/// A file selected by the walk
#[derive(Debug, Clone)]
pub(crate) struct ScannedFile {
    path: PathBuf,
    file_name: String,
    length: u64,
}

/// Builds snapshots of a directory tree
#[derive(Clone)]
pub struct SnapshotGenerator {
    root: PathBuf,
    hash_mode: HashMode,
    parallel_workers: usize,
    follow_symlinks: bool,
    ignore: Option<Arc<dyn IgnorePredicate>>,
}

impl std::fmt::Debug for SnapshotGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotGenerator")
            .field("root", &self.root)
            .field("hash_mode", &self.hash_mode)
            .field("parallel_workers", &self.parallel_workers)
            .field("follow_symlinks", &self.follow_symlinks)
            .field("ignore", &self.ignore.is_some())
            .finish()
    }
}

impl SnapshotGenerator {
    /// Generator for `root` with default settings
    pub fn new(root: impl Into<PathBuf>, hash_mode: HashMode) -> Self {
        Self {
            root: root.into(),
            hash_mode,
            parallel_workers: crate::types::default_parallel_workers(),
            follow_symlinks: false,
            ignore: None,
        }
    }

    /// Number of hashing threads (minimum 1)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Follow symbolic links while walking
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Ignore files matching glob `patterns`
    pub fn with_ignore_patterns(self, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(self);
        }
        Ok(self.with_ignore_predicate(Arc::new(GlobIgnore::new(patterns)?)))
    }

    /// Replace the ignore predicate
    pub fn with_ignore_predicate(mut self, predicate: Arc<dyn IgnorePredicate>) -> Self {
        self.ignore = Some(predicate);
        self
    }

    /// Root being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mode files are hashed with
    pub fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    /// Threads actually used: always one when nothing is hashed
    pub fn effective_workers(&self) -> usize {
        if self.hash_mode.hashes_content() {
            self.parallel_workers
        } else {
            1
        }
    }

    /// Scan the tree and build a snapshot
    ///
    /// # Errors
    ///
    /// Fails only when the walk itself or the worker pool cannot be set up.
    /// Unreadable files are skipped with a warning.
    #[instrument(skip(self, progress_callback), fields(root = ?self.root, mode = %self.hash_mode))]
    pub fn generate<F>(&self, comment: &str, progress_callback: Option<F>) -> Result<Snapshot>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        let start = Instant::now();
        let files = self.list_files()?;
        let fingerprints = self.fingerprint_files(files, progress_callback)?;

        let mut snapshot = Snapshot::new(comment, self.hash_mode, fingerprints);
        snapshot.host = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(
            "Generated snapshot of {} files ({}) in {:?}",
            snapshot.file_count(),
            utils::format_bytes(snapshot.content_length_total),
            start.elapsed()
        );
        Ok(snapshot)
    }

    /// Walk the tree and return the files that pass every ignore rule
    pub(crate) fn list_files(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.is_dir() {
            return Err(FimError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} is not a directory", self.root),
            )));
        }

        let mut walker_builder = WalkBuilder::new(&self.root);
        walker_builder
            .follow_links(self.follow_symlinks)
            .hidden(false)
            .parents(true)
            .ignore(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE_NAME);

        let mut override_builder = OverrideBuilder::new(&self.root);
        for directory in EXCLUDED_DIRECTORIES {
            override_builder.add(&format!("!{}/", directory))?;
            override_builder.add(&format!("!**/{}/**", directory))?;
        }
        walker_builder.overrides(override_builder.build()?);

        let mut files = Vec::new();
        for entry in walker_builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if entry.file_name() == IGNORE_FILE_NAME {
                continue;
            }

            let path = entry.path();
            let relative = utils::make_relative(path, &self.root)?;
            let file_name = utils::normalize_file_name(&relative);
            if let Some(ignore) = &self.ignore {
                if ignore.is_ignored(&file_name) {
                    trace!("Ignoring {}", file_name);
                    continue;
                }
            }

            let length = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(ScannedFile {
                path: path.to_path_buf(),
                file_name,
                length,
            });
        }

        debug!("Walk selected {} files", files.len());
        Ok(files)
    }

    /// Hash `files` on the worker pool
    pub(crate) fn fingerprint_files<F>(
        &self,
        files: Vec<ScannedFile>,
        progress_callback: Option<F>,
    ) -> Result<Vec<FileFingerprint>>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.effective_workers())
            .thread_name(|index| format!("fim-hash-{}", index))
            .build()
            .map_err(|e| FimError::internal(format!("Failed to start worker pool: {}", e)))?;

        let hasher = TieredHasher::new(self.hash_mode);
        let total = files.len();
        let total_bytes: u64 = files.iter().map(|f| f.length).sum();
        let progress = Mutex::new((0usize, 0u64));

        let results: Vec<Result<FileFingerprint>> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let result = fingerprint_file(&hasher, file);

                    if let Some(callback) = &progress_callback {
                        let (processed, bytes_processed) = {
                            let mut counter = progress.lock();
                            counter.0 += 1;
                            counter.1 += file.length;
                            *counter
                        };
                        callback(ProgressInfo {
                            operation: "Hashing files".to_string(),
                            current_item: Some(PathBuf::from(&file.file_name)),
                            processed,
                            total: Some(total),
                            bytes_processed,
                            total_bytes: Some(total_bytes),
                        });
                    }
                    result
                })
                .collect()
        });

        let mut fingerprints = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(fingerprint) => fingerprints.push(fingerprint),
                Err(e) if e.is_recoverable() => warn!("Skipping file: {}", e),
                Err(e) => return Err(e),
            }
        }
        fingerprints.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(fingerprints)
    }
}

/// Fingerprint of one file; every failure is a [`FimError::FileRead`]
fn fingerprint_file(hasher: &TieredHasher, file: &ScannedFile) -> Result<FileFingerprint> {
    let metadata = fs::metadata(&file.path).map_err(|e| FimError::file_read(&file.path, e))?;
    let file_time = utils::file_time(&metadata).map_err(|e| match e {
        FimError::Io(source) => FimError::file_read(&file.path, source),
        other => other,
    })?;
    let hash = hasher.hash_file(&file.path, metadata.len())?;

    trace!("Hashed {}", file.file_name);
    Ok(
        FileFingerprint::new(file.file_name.clone(), metadata.len(), file_time, hash)
            .with_attributes(utils::file_attributes(&metadata)),
    )
}
