//! Restoring recorded metadata onto the working tree
//!
//! `reset-dates` and `reset-file-attrs` write the modification times (and
//! permissions) stored in a snapshot back onto the files that still exist.
//! File content is never touched and missing files are skipped. A file that
//! cannot be updated becomes a warning instead of aborting the whole run.
//!
//! Creation times are not restored: no portable API sets them.

use crate::error::Result;
use crate::types::{FileFingerprint, Snapshot};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Which recorded metadata to write back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Modification times only
    Dates,
    /// Permissions and modification times
    Attributes,
}

/// One value written back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetField {
    /// Modification time in epoch milliseconds
    LastModified { from: i64, to: i64 },
    /// Permission string (`rwxr-xr-x`)
    Permissions { from: String, to: String },
}

/// Metadata restored on one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReset {
    pub file_name: String,
    pub field: ResetField,
}

/// Outcome of a reset run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetResult {
    /// Snapshot the values were taken from
    pub snapshot_number: u32,
    /// Every value written, permissions before dates for one file
    pub resets: Vec<FileReset>,
    /// Files that could not be updated
    pub warnings: Vec<String>,
}

impl ResetResult {
    /// Number of distinct files that were changed
    pub fn files_reset(&self) -> usize {
        let mut count = 0;
        let mut last: Option<&str> = None;
        for reset in &self.resets {
            if last != Some(reset.file_name.as_str()) {
                count += 1;
                last = Some(&reset.file_name);
            }
        }
        count
    }
}

impl fmt::Display for ResetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.files_reset() {
            0 => f.write_str("No file needed a reset"),
            1 => f.write_str("1 file has been reset"),
            n => write!(f, "{} files have been reset", n),
        }
    }
}

/// Write the metadata recorded in `snapshot` onto the files below `root`
pub fn reset_metadata(
    root: &Path,
    snapshot: &Snapshot,
    snapshot_number: u32,
    scope: ResetScope,
) -> ResetResult {
    let mut result = ResetResult {
        snapshot_number,
        ..ResetResult::default()
    };

    for fingerprint in &snapshot.fingerprints {
        let path = root.join(&fingerprint.file_name);
        match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_file() => {
                if let Err(e) = reset_file(&path, &metadata, fingerprint, scope, &mut result.resets) {
                    warn!("Cannot reset {}: {}", fingerprint.file_name, e);
                    result
                        .warnings
                        .push(format!("{}: {}", fingerprint.file_name, e));
                }
            }
            _ => trace!("{} is gone, skipped", fingerprint.file_name),
        }
    }

    debug!(
        "Reset {} files from snapshot #{} ({} warnings)",
        result.files_reset(),
        snapshot_number,
        result.warnings.len()
    );
    result
}

fn reset_file(
    path: &Path,
    metadata: &fs::Metadata,
    fingerprint: &FileFingerprint,
    scope: ResetScope,
    resets: &mut Vec<FileReset>,
) -> Result<()> {
    if scope == ResetScope::Attributes {
        reset_permissions(path, metadata, fingerprint, resets)?;
    }

    let current = utils::file_time(metadata)?.last_modified;
    let recorded = fingerprint.last_modified();
    if current != recorded {
        utils::set_last_modified(path, recorded)?;
        resets.push(FileReset {
            file_name: fingerprint.file_name.clone(),
            field: ResetField::LastModified {
                from: current,
                to: recorded,
            },
        });
    }
    Ok(())
}

#[cfg(unix)]
fn reset_permissions(
    path: &Path,
    metadata: &fs::Metadata,
    fingerprint: &FileFingerprint,
    resets: &mut Vec<FileReset>,
) -> Result<()> {
    let Some(recorded) = fingerprint.attributes.get(utils::POSIX_PERMISSIONS) else {
        return Ok(());
    };
    let current = utils::file_attributes(metadata)
        .remove(utils::POSIX_PERMISSIONS)
        .unwrap_or_default();
    if &current != recorded {
        utils::set_posix_permissions(path, recorded)?;
        resets.push(FileReset {
            file_name: fingerprint.file_name.clone(),
            field: ResetField::Permissions {
                from: current,
                to: recorded.clone(),
            },
        });
    }
    Ok(())
}

// TODO: restore the read-only flag from `dosFilePermissions` on Windows
#[cfg(not(unix))]
fn reset_permissions(
    _path: &Path,
    _metadata: &fs::Metadata,
    _fingerprint: &FileFingerprint,
    _resets: &mut Vec<FileReset>,
) -> Result<()> {
    Ok(())
}
