//! Numbered snapshot store
//!
//! Snapshots are immutable and numbered from 1. The repository directory
//! looks like this:
//!
//! ```text
//! .fim/
//! ├── settings.json       # pointer to the last snapshot + configuration
//! └── states/
//!     ├── state_1.bin     # bincode, LZ4-framed
//!     └── state_2.bin
//! ```
//!
//! A new snapshot is written to its own file first and the pointer is only
//! advanced afterwards, so a crash in between leaves one more state file
//! than the pointer records. [`Storage::last_snapshot_number`] notices this
//! and resynchronizes the pointer with the files on disk.

use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::error::{FimError, Result};
use crate::types::{FimConfig, HashMode, RepositorySettings, Snapshot, SnapshotSummary};
use crate::utils;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const SETTINGS_FILE: &str = "settings.json";
const STATES_DIR: &str = "states";

/// Snapshot storage rooted at a repository directory
pub struct Storage {
    root: PathBuf,
    compression: Mutex<CompressionEngine>,
    settings: RwLock<RepositorySettings>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settings = self.settings.read();
        f.debug_struct("Storage")
            .field("root", &self.root)
            .field("last_snapshot_number", &settings.last_snapshot_number)
            .field("hash_mode", &settings.config.hash_mode)
            .finish()
    }
}

impl Storage {
    /// Create a new repository directory
    ///
    /// # Errors
    ///
    /// - [`FimError::RepositoryAlreadyExists`] if `root` already holds settings
    /// - [`FimError::Io`] if the directories cannot be created
    pub fn init(root: PathBuf, config: FimConfig) -> Result<Self> {
        if root.join(SETTINGS_FILE).exists() {
            return Err(FimError::RepositoryAlreadyExists(root));
        }

        fs::create_dir_all(root.join(STATES_DIR))?;

        let compression = CompressionEngine::new(CompressionStrategy::from_enabled(
            config.compress_snapshots,
        ));
        let settings = RepositorySettings {
            last_snapshot_number: 0,
            created_at: Utc::now(),
            config,
        };
        write_settings(&root, &settings)?;

        info!("Initialized repository at {:?}", root);
        Ok(Self {
            root,
            compression: Mutex::new(compression),
            settings: RwLock::new(settings),
        })
    }

    /// Open an existing repository directory
    ///
    /// # Errors
    ///
    /// - [`FimError::RepositoryNotInitialized`] if there is no settings file
    /// - [`FimError::Json`] if the settings cannot be parsed
    pub fn open(root: PathBuf) -> Result<Self> {
        let settings_path = root.join(SETTINGS_FILE);
        if !settings_path.exists() {
            return Err(FimError::RepositoryNotInitialized(root));
        }

        let settings: RepositorySettings = serde_json::from_str(&fs::read_to_string(&settings_path)?)?;
        fs::create_dir_all(root.join(STATES_DIR))?;

        let compression = CompressionEngine::new(CompressionStrategy::from_enabled(
            settings.config.compress_snapshots,
        ));
        debug!("Opened repository at {:?}", root);
        Ok(Self {
            root,
            compression: Mutex::new(compression),
            settings: RwLock::new(settings),
        })
    }

    /// Repository directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy of the persisted settings
    pub fn settings(&self) -> RepositorySettings {
        self.settings.read().clone()
    }

    /// Copy of the tracking configuration
    pub fn config(&self) -> FimConfig {
        self.settings.read().config.clone()
    }

    /// Change the configuration and persist it
    pub fn update_config<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut FimConfig),
    {
        let mut settings = self.settings.write();
        updater(&mut settings.config);
        write_settings(&self.root, &settings)?;
        *self.compression.lock() = CompressionEngine::new(CompressionStrategy::from_enabled(
            settings.config.compress_snapshots,
        ));
        Ok(())
    }

    /// File holding snapshot `number`
    pub fn state_path(&self, number: u32) -> PathBuf {
        self.root.join(STATES_DIR).join(format!("state_{}.bin", number))
    }

    /// Whether snapshot `number` is on disk
    pub fn snapshot_exists(&self, number: u32) -> bool {
        number > 0 && self.state_path(number).exists()
    }

    /// Number of the most recent snapshot, 0 when there is none
    ///
    /// The pointer is trusted only if its state file exists and the next one
    /// does not. Otherwise the state files are rescanned and the pointer
    /// rewritten.
    pub fn last_snapshot_number(&self) -> Result<u32> {
        let recorded = self.settings.read().last_snapshot_number;
        let recorded_exists = recorded == 0 || self.state_path(recorded).exists();
        if recorded_exists && !self.state_path(recorded + 1).exists() {
            return Ok(recorded);
        }

        let mut actual = 0;
        while self.state_path(actual + 1).exists() {
            actual += 1;
        }
        warn!(
            "Snapshot pointer said #{} but the last state file is #{}, resynchronizing",
            recorded, actual
        );
        self.write_pointer(actual)?;
        Ok(actual)
    }

    /// Persist `snapshot` as the next numbered state and return its number
    ///
    /// The snapshot is sealed (checksum recorded) before it is written.
    #[instrument(skip(self, snapshot), fields(files = snapshot.file_count()))]
    pub fn create_snapshot(&self, snapshot: &mut Snapshot) -> Result<u32> {
        let number = self.last_snapshot_number()? + 1;
        snapshot.seal();
        self.write_state(number, snapshot)?;
        self.write_pointer(number)?;
        info!("Created snapshot #{} ({} files)", number, snapshot.file_count());
        Ok(number)
    }

    /// Load snapshot `number`, restricting its hashes to `hash_mode`
    ///
    /// # Errors
    ///
    /// - [`FimError::SnapshotNotFound`] if the state file does not exist
    /// - [`FimError::CorruptedSnapshot`] if the content does not match its checksum
    pub fn load_snapshot(&self, number: u32, hash_mode: HashMode) -> Result<Snapshot> {
        let snapshot = self.read_state(number)?;
        Ok(snapshot.restricted_to(hash_mode))
    }

    /// Load the most recent snapshot, if any
    pub fn load_last_snapshot(&self, hash_mode: HashMode) -> Result<Option<Snapshot>> {
        match self.last_snapshot_number()? {
            0 => Ok(None),
            number => self.load_snapshot(number, hash_mode).map(Some),
        }
    }

    /// Summaries of every snapshot, oldest first
    ///
    /// Unreadable snapshots are logged and left out.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        let last = self.last_snapshot_number()?;
        let mut summaries = Vec::with_capacity(last as usize);
        for number in 1..=last {
            match self.read_state(number) {
                Ok(snapshot) => summaries.push(SnapshotSummary {
                    number,
                    timestamp: snapshot.timestamp,
                    comment: snapshot.comment,
                    hash_mode: snapshot.hash_mode,
                    file_count: snapshot.fingerprints.len(),
                    modification_counts: snapshot.modification_counts,
                }),
                Err(e) => warn!("Cannot read snapshot #{}: {}", number, e),
            }
        }
        Ok(summaries)
    }

    /// Remove the most recent snapshot
    ///
    /// Returns the number removed, or `None` when there was nothing to remove.
    ///
    /// # Errors
    ///
    /// [`FimError::DeleteFailed`] if the state file could not be removed
    /// after [`utils::DELETE_ATTEMPTS`] tries.
    pub fn rollback(&self) -> Result<Option<u32>> {
        let last = self.last_snapshot_number()?;
        if last == 0 {
            return Ok(None);
        }

        utils::remove_file_with_retry(
            &self.state_path(last),
            utils::DELETE_ATTEMPTS,
            utils::DELETE_PAUSE,
        )?;
        self.write_pointer(last - 1)?;
        info!("Removed snapshot #{}", last);
        Ok(Some(last))
    }

    /// Drop every snapshot but the most recent one, which becomes #1
    ///
    /// Returns how many snapshots were removed. Older states are deleted
    /// first and the last one is renamed afterwards, so an interruption
    /// leaves a history that [`Storage::last_snapshot_number`] can still
    /// resynchronize.
    #[instrument(skip(self))]
    pub fn purge_states(&self) -> Result<u32> {
        let last = self.last_snapshot_number()?;
        if last <= 1 {
            return Ok(0);
        }

        for number in 1..last {
            utils::remove_file_with_retry(
                &self.state_path(number),
                utils::DELETE_ATTEMPTS,
                utils::DELETE_PAUSE,
            )?;
        }
        fs::rename(self.state_path(last), self.state_path(1))?;
        self.write_pointer(1)?;

        info!("Purged {} snapshots, #{} is now #1", last - 1, last);
        Ok(last - 1)
    }

    fn write_state(&self, number: u32, snapshot: &Snapshot) -> Result<()> {
        let encoded = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())?;
        let framed = self.compression.lock().compress(&encoded)?;
        utils::atomic_write(&self.state_path(number), &framed)?;
        debug!(
            "Wrote snapshot #{}: {} bytes encoded, {} on disk",
            number,
            encoded.len(),
            framed.len()
        );
        Ok(())
    }

    fn read_state(&self, number: u32) -> Result<Snapshot> {
        let path = self.state_path(number);
        if number == 0 || !path.exists() {
            return Err(FimError::SnapshotNotFound(number));
        }

        let framed = fs::read(&path)?;
        let encoded = self.compression.lock().decompress(&framed)?;
        let (snapshot, _): (Snapshot, _) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard())?;

        let actual = snapshot.compute_checksum();
        if actual != snapshot.checksum {
            return Err(FimError::CorruptedSnapshot {
                number,
                expected: snapshot.checksum,
                actual,
            });
        }
        Ok(snapshot)
    }

    fn write_pointer(&self, number: u32) -> Result<()> {
        let mut settings = self.settings.write();
        settings.last_snapshot_number = number;
        write_settings(&self.root, &settings)
    }
}

fn write_settings(root: &Path, settings: &RepositorySettings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)?;
    utils::atomic_write(&root.join(SETTINGS_FILE), json.as_bytes())
}
