//! Main fim implementation
//!
//! [`Fim`] ties the snapshot generator, the comparator, the duplicate finder
//! and the snapshot store together. It is the entry point used by the `fim`
//! binary and by library users.
//!
//! ## Hash modes
//!
//! A repository is created with a global [`HashMode`]. Each session may run
//! with a cheaper mode (see [`Fim::with_hash_mode`]); persisted snapshots are
//! then compared on the tiers both sides have. Committing always uses the
//! global mode so the history stays uniform.
//!
//! ## Sub-directories
//!
//! [`Fim::discover`] looks for the `.fim` directory in the given path and its
//! ancestors. When it is found higher up, the session is scoped to the
//! starting sub-directory: status only reports files below it, and a commit
//! only replaces that part of the last snapshot.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use fim::{Fim, FimBuilder, HashMode, ProgressInfo};
//!
//! # fn main() -> fim::Result<()> {
//! let mut fim = FimBuilder::new()
//!     .hash_mode(HashMode::HashAll)
//!     .parallel_workers(4)
//!     .build("./photos".into())?;
//!
//! fim.commit("Initial state", None::<fn(ProgressInfo)>)?;
//!
//! let status = fim.status(None::<fn(ProgressInfo)>)?;
//! println!("{}", status);
//! # Ok(())
//! # }
//! ```

use crate::comparator::{CompareResult, StateComparator};
use crate::duplicates::{DuplicateFinder, DuplicateRemoval, DuplicateResult};
use crate::error::{FimError, Result};
use crate::generator::SnapshotGenerator;
use crate::reset::{reset_metadata, ResetResult, ResetScope};
use crate::storage::Storage;
use crate::types::{FimConfig, HashMode, ProgressInfo, Snapshot, SnapshotSummary};
use crate::utils;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Name of the repository directory inside the tracked root
pub const REPOSITORY_DIR: &str = ".fim";

/// Outcome of [`Fim::commit`]
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// Number of the new snapshot, `None` when nothing changed
    pub snapshot_number: Option<u32>,
    /// Differences against the previous snapshot
    pub compare: CompareResult,
}

/// File integrity tracker for one directory tree
pub struct Fim {
    /// Directory holding `.fim`
    root_path: PathBuf,
    /// Scope of this session, relative to the root and `/`-separated
    sub_directory: Option<String>,
    /// Snapshot store
    storage: Storage,
    /// Persisted configuration
    config: FimConfig,
    /// Mode used by this session
    hash_mode: HashMode,
}

impl std::fmt::Debug for Fim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fim")
            .field("root_path", &self.root_path)
            .field("sub_directory", &self.sub_directory)
            .field("storage", &self.storage)
            .field("hash_mode", &self.hash_mode)
            .finish()
    }
}

impl Fim {
    /// Create a repository in `root_path` with the default configuration
    ///
    /// # Errors
    ///
    /// - [`FimError::Io`] if `root_path` is not a directory
    /// - [`FimError::RepositoryAlreadyExists`] if it is already tracked
    #[instrument]
    pub fn init(root_path: PathBuf) -> Result<Self> {
        Self::init_with_config(root_path, FimConfig::default())
    }

    /// Create a repository with `config`
    pub fn init_with_config(root_path: PathBuf, config: FimConfig) -> Result<Self> {
        if !root_path.is_dir() {
            return Err(FimError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} is not a directory", root_path),
            )));
        }
        // validate patterns before anything is written
        SnapshotGenerator::new(&root_path, config.hash_mode)
            .with_ignore_patterns(&config.ignore_patterns)?;

        let storage = Storage::init(root_path.join(REPOSITORY_DIR), config.clone())?;
        info!(
            "Tracking {:?} with hash mode '{}'",
            root_path, config.hash_mode
        );
        Ok(Self {
            root_path,
            sub_directory: None,
            hash_mode: config.hash_mode,
            storage,
            config,
        })
    }

    /// Open the repository whose root is `root_path`
    ///
    /// # Errors
    ///
    /// [`FimError::RepositoryNotInitialized`] if `root_path` has no `.fim`.
    #[instrument]
    pub fn open(root_path: PathBuf) -> Result<Self> {
        let storage = Storage::open(root_path.join(REPOSITORY_DIR))?;
        let config = storage.config();
        debug!("Opened repository at {:?}", root_path);
        Ok(Self {
            root_path,
            sub_directory: None,
            hash_mode: config.hash_mode,
            storage,
            config,
        })
    }

    /// Open the repository containing `start`, searching its ancestors
    ///
    /// The session is scoped to `start` when it is below the root.
    pub fn discover(start: &Path) -> Result<Self> {
        let start = start.canonicalize()?;
        let root = start
            .ancestors()
            .find(|dir| dir.join(REPOSITORY_DIR).is_dir())
            .ok_or_else(|| FimError::RepositoryNotInitialized(start.clone()))?
            .to_path_buf();

        let relative = utils::normalize_file_name(&utils::make_relative(&start, &root)?);
        let mut fim = Self::open(root)?;
        if !relative.is_empty() {
            debug!("Scoped to sub-directory {}", relative);
            fim.sub_directory = Some(relative);
        }
        Ok(fim)
    }

    /// Run this session with `hash_mode` instead of the repository's mode
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] if the repository never computed the tiers that
    /// `hash_mode` needs.
    pub fn with_hash_mode(mut self, hash_mode: HashMode) -> Result<Self> {
        if !HashMode::is_compatible(self.config.hash_mode, hash_mode) {
            return Err(FimError::usage(format!(
                "the repository uses hash mode '{}', it cannot be checked with '{}'",
                self.config.hash_mode, hash_mode
            )));
        }
        self.hash_mode = hash_mode;
        Ok(self)
    }

    /// Override the number of hashing threads for this session
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.config.parallel_workers = workers.max(1);
        self
    }

    /// Tracked root
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Sub-directory this session is scoped to
    pub fn sub_directory(&self) -> Option<&str> {
        self.sub_directory.as_deref()
    }

    /// Effective configuration
    pub fn config(&self) -> &FimConfig {
        &self.config
    }

    /// Mode used by this session
    pub fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    /// Snapshot store
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Scan the working tree with the session mode
    pub fn scan<F>(&self, progress_callback: Option<F>) -> Result<Snapshot>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        self.scan_with_mode(self.hash_mode, progress_callback)
    }

    /// Record the working tree as a new snapshot
    ///
    /// Nothing is written when a previous snapshot exists and no file
    /// changed.
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] if the session mode differs from the repository's.
    #[instrument(skip(self, progress_callback))]
    pub fn commit<F>(&mut self, comment: &str, progress_callback: Option<F>) -> Result<CommitResult>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        if self.hash_mode != self.config.hash_mode {
            return Err(FimError::usage(format!(
                "commits use the repository hash mode '{}', not '{}'",
                self.config.hash_mode, self.hash_mode
            )));
        }

        let last = self.storage.load_last_snapshot(self.hash_mode)?;
        let mut current = self.scan_with_mode(self.hash_mode, progress_callback)?;
        current.comment = comment.to_string();

        let previous = last.as_ref().map(|s| self.scoped(s));
        let compare = StateComparator::new(self.hash_mode).compare(previous.as_ref(), &current);

        if last.is_some() && !compare.something_modified() {
            info!("Nothing modified, no snapshot created");
            return Ok(CommitResult {
                snapshot_number: None,
                compare,
            });
        }

        let mut snapshot = match (&self.sub_directory, last) {
            (Some(directory), Some(last)) => merge_sub_directory(last, current, directory),
            (_, _) => current,
        };
        compare.annotate(&mut snapshot);

        let number = self.storage.create_snapshot(&mut snapshot)?;
        Ok(CommitResult {
            snapshot_number: Some(number),
            compare,
        })
    }

    /// Compare the working tree with the last snapshot
    #[instrument(skip(self, progress_callback))]
    pub fn status<F>(&self, progress_callback: Option<F>) -> Result<CompareResult>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        self.compare_working_tree(StateComparator::new(self.hash_mode), progress_callback)
    }

    /// Look for files whose content changed while their metadata did not
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] unless the session runs with [`HashMode::HashAll`],
    /// or when there is no snapshot to check against. Both are raised before
    /// the tree is read.
    #[instrument(skip(self, progress_callback))]
    pub fn detect_corruption<F>(&self, progress_callback: Option<F>) -> Result<CompareResult>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        let comparator = StateComparator::new(self.hash_mode).search_for_corruption()?;
        if self.storage.last_snapshot_number()? == 0 {
            return Err(FimError::usage("no snapshot to check against, commit first"));
        }
        self.compare_working_tree(comparator, progress_callback)
    }

    /// Find files with identical content in the working tree
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] under [`HashMode::DontHash`].
    #[instrument(skip(self, progress_callback))]
    pub fn find_duplicates<F>(&self, progress_callback: Option<F>) -> Result<DuplicateResult>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        if !self.hash_mode.hashes_content() {
            return Err(FimError::usage(
                "duplicate detection needs file content, pick a hash mode other than 'do not hash'",
            ));
        }
        let snapshot = self.scan(progress_callback)?;
        Ok(DuplicateFinder::find(&snapshot))
    }

    /// Delete the redundant copies of every duplicate set in the working tree
    ///
    /// The member with the smallest name is kept. Empty files are left
    /// alone. With `dry_run` the copies are only reported.
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] unless the session runs with [`HashMode::HashAll`]:
    /// sampled tiers cannot prove two files identical.
    #[instrument(skip(self, progress_callback))]
    pub fn remove_duplicates<F>(
        &self,
        dry_run: bool,
        progress_callback: Option<F>,
    ) -> Result<DuplicateRemoval>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        if self.hash_mode != HashMode::HashAll {
            return Err(FimError::usage(format!(
                "removing duplicates needs the '{}' hash mode, not '{}'",
                HashMode::HashAll,
                self.hash_mode
            )));
        }

        let snapshot = self.scan(progress_callback)?;
        let mut removal = DuplicateRemoval {
            dry_run,
            ..DuplicateRemoval::default()
        };
        for copy in DuplicateFinder::find(&snapshot).redundant_copies() {
            if !dry_run {
                let path = self.root_path.join(&copy.file_name);
                if let Err(e) =
                    utils::remove_file_with_retry(&path, utils::DELETE_ATTEMPTS, utils::DELETE_PAUSE)
                {
                    warn!("Cannot remove {}: {}", copy.file_name, e);
                    removal.warnings.push(format!("{}: {}", copy.file_name, e));
                    continue;
                }
                debug!("Removed {}, duplicate of {}", copy.file_name, copy.kept);
            }
            removal.reclaimed_space += copy.file_length;
            removal.removed.push(copy);
        }

        info!("{}", removal);
        Ok(removal)
    }

    /// Restore the modification times recorded in the last snapshot
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] when there is no snapshot yet.
    #[instrument(skip(self))]
    pub fn reset_dates(&self) -> Result<ResetResult> {
        self.reset(ResetScope::Dates)
    }

    /// Restore the permissions and modification times recorded in the last
    /// snapshot
    ///
    /// # Errors
    ///
    /// [`FimError::Usage`] when there is no snapshot yet.
    #[instrument(skip(self))]
    pub fn reset_file_attributes(&self) -> Result<ResetResult> {
        self.reset(ResetScope::Attributes)
    }

    /// Keep only the most recent snapshot, renumbered as #1
    ///
    /// Returns how many snapshots were removed.
    #[instrument(skip(self))]
    pub fn purge_states(&mut self) -> Result<u32> {
        self.storage.purge_states()
    }

    /// Summaries of every snapshot, oldest first
    pub fn log(&self) -> Result<Vec<SnapshotSummary>> {
        self.storage.list_snapshots()
    }

    /// Remove the last snapshot
    #[instrument(skip(self))]
    pub fn rollback(&mut self) -> Result<Option<u32>> {
        self.storage.rollback()
    }

    /// Load snapshot `number` restricted to the session mode and scope
    pub fn load_snapshot(&self, number: u32) -> Result<Snapshot> {
        let snapshot = self.storage.load_snapshot(number, self.hash_mode)?;
        Ok(self.scoped(&snapshot))
    }

    /// Compare two persisted snapshots
    ///
    /// Hashes are compared on the tiers both snapshots recorded.
    pub fn compare_snapshots(&self, from: u32, to: u32) -> Result<CompareResult> {
        let previous = self.load_snapshot(from)?;
        let current = self.load_snapshot(to)?;
        let mode = previous.hash_mode.min(current.hash_mode);
        Ok(StateComparator::new(mode).compare(
            Some(&previous.restricted_to(mode)),
            &current.restricted_to(mode),
        ))
    }

    fn reset(&self, scope: ResetScope) -> Result<ResetResult> {
        let number = self.storage.last_snapshot_number()?;
        if number == 0 {
            return Err(FimError::usage("no snapshot to reset from, commit first"));
        }
        let snapshot = self.load_snapshot(number)?;
        Ok(reset_metadata(&self.root_path, &snapshot, number, scope))
    }

    fn compare_working_tree<F>(
        &self,
        comparator: StateComparator,
        progress_callback: Option<F>,
    ) -> Result<CompareResult>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        let previous = self
            .storage
            .load_last_snapshot(self.hash_mode)?
            .map(|s| self.scoped(&s));
        let current = self.scan_with_mode(self.hash_mode, progress_callback)?;

        // an older snapshot may have been taken with a cheaper mode
        let mode = previous
            .as_ref()
            .map_or(self.hash_mode, |p| p.hash_mode.min(self.hash_mode));
        if mode == self.hash_mode {
            return Ok(comparator.compare(previous.as_ref(), &current));
        }

        debug!("Comparing with hash mode '{}'", mode);
        let comparator = if comparator.hash_mode() == mode {
            comparator
        } else {
            StateComparator::new(mode)
        };
        Ok(comparator.compare(previous.as_ref(), &current.restricted_to(mode)))
    }

    fn scan_with_mode<F>(&self, mode: HashMode, progress_callback: Option<F>) -> Result<Snapshot>
    where
        F: Fn(ProgressInfo) + Send + Sync,
    {
        let generator = SnapshotGenerator::new(&self.root_path, mode)
            .with_parallel_workers(self.config.parallel_workers)
            .with_follow_symlinks(self.config.follow_symlinks)
            .with_ignore_patterns(&self.config.ignore_patterns)?;
        let snapshot = generator.generate("", progress_callback)?;
        Ok(self.scoped(&snapshot))
    }

    fn scoped(&self, snapshot: &Snapshot) -> Snapshot {
        match &self.sub_directory {
            Some(directory) => snapshot.filter_directory(directory, true),
            None => snapshot.clone(),
        }
    }
}

/// Replace the part of `last` below `directory` with `current`
fn merge_sub_directory(last: Snapshot, current: Snapshot, directory: &str) -> Snapshot {
    let prefix = format!("{}/", directory.trim_end_matches('/'));
    let mut fingerprints: Vec<_> = last
        .fingerprints
        .into_iter()
        .filter(|f| !f.file_name.starts_with(&prefix))
        .map(|mut f| {
            f.modification = None;
            f
        })
        .collect();
    fingerprints.extend(current.fingerprints);

    let mut merged = Snapshot::new(current.comment, current.hash_mode, fingerprints);
    merged.host = current.host;
    merged
}

/// Builder for configuring a [`Fim`] repository
///
/// An existing repository is opened instead of created; its persisted
/// configuration then wins over the builder's, except for the session hash
/// mode and the worker count.
#[derive(Debug, Default)]
pub struct FimBuilder {
    hash_mode: Option<HashMode>,
    parallel_workers: Option<usize>,
    ignore_patterns: Vec<String>,
    follow_symlinks: bool,
    compress_snapshots: Option<bool>,
}

impl FimBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash mode (repository mode on creation, session mode otherwise)
    pub fn hash_mode(mut self, mode: HashMode) -> Self {
        self.hash_mode = Some(mode);
        self
    }

    /// Number of hashing threads (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.parallel_workers = Some(count.max(1));
        self
    }

    /// Glob patterns excluded from every scan
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Follow symbolic links while walking
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// LZ4-compress persisted snapshots
    pub fn compress_snapshots(mut self, compress: bool) -> Self {
        self.compress_snapshots = Some(compress);
        self
    }

    /// Open or create the repository of `root_path`
    pub fn build(self, root_path: PathBuf) -> Result<Fim> {
        let fim = if root_path.join(REPOSITORY_DIR).join("settings.json").exists() {
            let fim = Fim::open(root_path)?;
            match self.hash_mode {
                Some(mode) => fim.with_hash_mode(mode)?,
                None => fim,
            }
        } else {
            let defaults = FimConfig::default();
            let config = FimConfig {
                hash_mode: self.hash_mode.unwrap_or(defaults.hash_mode),
                parallel_workers: self.parallel_workers.unwrap_or(defaults.parallel_workers),
                ignore_patterns: self.ignore_patterns,
                follow_symlinks: self.follow_symlinks,
                compress_snapshots: self.compress_snapshots.unwrap_or(defaults.compress_snapshots),
                version: defaults.version,
            };
            Fim::init_with_config(root_path, config)?
        };

        Ok(match self.parallel_workers {
            Some(workers) => fim.with_parallel_workers(workers),
            None => fim,
        })
    }
}
