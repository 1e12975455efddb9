//! Utility functions shared across the crate
//!
//! ### File metadata
//! - [`file_time`]: creation/modification times in epoch milliseconds
//! - [`file_attributes`]: OS-level attributes recorded in fingerprints
//! - [`set_last_modified`], [`set_posix_permissions`]: write recorded values back
//!
//! ### Paths
//! - [`make_relative`]: strip the repository root from a walked path
//! - [`normalize_file_name`]: `/`-separated file names, whatever the platform
//!
//! ### Writing and deleting
//! - [`atomic_write`]: temp file + rename so readers never see partial data
//! - [`remove_file_with_retry`]: bounded retries for platforms that keep a
//!   file busy for a moment after it was closed
//!
//! ### Display
//! - [`format_bytes`]: human-readable sizes

use crate::error::{FimError, Result};
use crate::types::FileTime;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// Attempts made by [`remove_file_with_retry`]
pub const DELETE_ATTEMPTS: u32 = 10;

/// Pause between two deletion attempts
pub const DELETE_PAUSE: Duration = Duration::from_millis(100);

/// Attribute key of the `rwxr-xr-x` permission string on Unix
pub const POSIX_PERMISSIONS: &str = "posixFilePermissions";

/// Attribute key of the `RHSA` flag string on Windows
pub const DOS_PERMISSIONS: &str = "dosFilePermissions";

/// Milliseconds since the epoch, negative before it
pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// Creation and modification time of a file
///
/// Creation time is 0 where the platform does not report it.
pub fn file_time(metadata: &fs::Metadata) -> Result<FileTime> {
    let last_modified = system_time_millis(metadata.modified()?);
    let creation_time = metadata.created().map(system_time_millis).unwrap_or(0);
    Ok(FileTime::new(creation_time, last_modified))
}

/// OS-level attributes tracked for `attributesModified` detection
#[cfg(unix)]
pub fn file_attributes(metadata: &fs::Metadata) -> BTreeMap<String, String> {
    use std::os::unix::fs::PermissionsExt;
    let mut attributes = BTreeMap::new();
    attributes.insert(
        POSIX_PERMISSIONS.to_string(),
        format_posix_permissions(metadata.permissions().mode()),
    );
    attributes
}

/// OS-level attributes tracked for `attributesModified` detection
#[cfg(windows)]
pub fn file_attributes(metadata: &fs::Metadata) -> BTreeMap<String, String> {
    use std::os::windows::fs::MetadataExt;
    let attrs = metadata.file_attributes();
    let mut attributes = BTreeMap::new();
    // READONLY, HIDDEN, SYSTEM, ARCHIVE
    let flags: String = [(0x01, 'R'), (0x02, 'H'), (0x04, 'S'), (0x20, 'A')]
        .iter()
        .map(|(bit, c)| if attrs & bit != 0 { *c } else { '-' })
        .collect();
    attributes.insert(DOS_PERMISSIONS.to_string(), flags);
    attributes
}

/// OS-level attributes tracked for `attributesModified` detection
#[cfg(not(any(unix, windows)))]
pub fn file_attributes(_metadata: &fs::Metadata) -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// Render permission bits like `ls`: `rwxr-xr--`
pub fn format_posix_permissions(mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    FLAGS
        .iter()
        .map(|(bit, c)| if mode & bit != 0 { *c } else { '-' })
        .collect()
}

/// Parse a permission string produced by [`format_posix_permissions`]
pub fn parse_posix_permissions(text: &str) -> Option<u32> {
    const FLAGS: [char; 3] = ['r', 'w', 'x'];
    if text.chars().count() != 9 {
        return None;
    }
    text.chars().enumerate().try_fold(0u32, |mode, (i, c)| {
        let bit = 1 << (8 - i);
        match c {
            '-' => Some(mode),
            c if c == FLAGS[i % 3] => Some(mode | bit),
            _ => None,
        }
    })
}

/// Apply a `rwxr-xr-x` permission string to `path`
///
/// # Errors
///
/// [`FimError::Internal`] if `permissions` cannot be parsed.
#[cfg(unix)]
pub fn set_posix_permissions(path: &Path, permissions: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = parse_posix_permissions(permissions)
        .ok_or_else(|| FimError::internal(format!("invalid permissions {:?}", permissions)))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set the modification time of `path` to `millis` since the epoch
pub fn set_last_modified(path: &Path, millis: i64) -> Result<()> {
    let time = filetime::FileTime::from_unix_time(
        millis.div_euclid(1000),
        (millis.rem_euclid(1000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(path, time)?;
    Ok(())
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first so symbolic links keep their own path, and
/// only canonicalizes both sides when that fails.
///
/// # Errors
///
/// - [`FimError::Internal`] if the path is not under the base path
/// - [`FimError::Io`] if canonicalization fails
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            FimError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// File name as stored in a fingerprint: relative, `/`-separated
pub fn normalize_file_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Format bytes in human-readable form (1024-based units)
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (temp file in the same directory, then rename)
///
/// The target is either the old content or the complete new content,
/// never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| FimError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Remove a file, retrying transient failures
///
/// Some platforms briefly refuse to delete a file that was just closed
/// (virus scanners, indexers). A missing file counts as removed.
///
/// # Errors
///
/// [`FimError::DeleteFailed`] once `attempts` tries have failed.
pub fn remove_file_with_retry(path: &Path, attempts: u32, pause: Duration) -> Result<()> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match fs::remove_file(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!(
                    "Failed to delete {:?} (attempt {}/{}): {}",
                    path, attempt, attempts, e
                );
                if attempt < attempts {
                    thread::sleep(pause);
                }
            }
        }
    }

    Err(FimError::DeleteFailed {
        path: path.to_path_buf(),
        attempts,
    })
}
