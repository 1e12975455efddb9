//! # fim - File integrity tracking
//!
//! Records content fingerprints of a directory tree and reports how the tree
//! changed since the last recorded snapshot.
//!
//! ## Overview
//!
//! fim keeps a numbered history of snapshots in a `.fim` directory at the
//! root of the tracked tree. With it you can:
//! - Commit the current state of every file (name, length, timestamps,
//!   permissions and content hashes)
//! - Classify differences against the last snapshot: added, copied,
//!   duplicated, date modified, content modified, attributes modified,
//!   renamed and deleted
//! - Detect silent corruption: files whose content changed while their
//!   modification date and length did not
//! - Find files with identical content, and remove the redundant copies
//! - Put recorded modification times and permissions back on the files
//!
//! ## Hash tiers
//!
//! Hashing every byte of a large tree is slow, so each fingerprint carries
//! three SHA-512 hashes of increasing cost:
//!
//! - **Small block**: sampled 4 KiB blocks
//! - **Medium block**: sampled 1 MiB blocks
//! - **Full**: the whole content
//!
//! A [`HashMode`] selects which tiers are computed. A cheaper mode can always
//! be compared against snapshots recorded with a more thorough one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fim::{Fim, ProgressInfo};
//! use std::path::PathBuf;
//!
//! # fn main() -> fim::Result<()> {
//! let mut fim = Fim::init(PathBuf::from("./photos"))?;
//! fim.commit("Initial state", None::<fn(ProgressInfo)>)?;
//!
//! // later
//! let status = fim.status(None::<fn(ProgressInfo)>)?;
//! for (kind, difference) in status.entries() {
//!     println!("{:<20} {}", kind.label(), difference.file_name());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`fim`]: repository facade and builder
//! - [`generator`]: directory walking and fingerprinting
//! - [`hasher`] and [`sampler`]: tiered content hashing
//! - [`comparator`]: snapshot comparison and classification
//! - [`duplicates`]: duplicate detection and removal planning
//! - [`reset`]: restoring recorded dates and permissions
//! - [`storage`]: numbered snapshot persistence
//! - [`compression`]: LZ4 framing of snapshot files
//! - [`ascii85`]: radix-85 encoding of digests
//! - [`types`]: common data structures
//! - [`utils`]: path, time and file helpers
//! - [`error`]: error types

// Public API modules
pub mod ascii85;
pub mod comparator;
pub mod compression;
pub mod duplicates;
pub mod error;
pub mod fim;
pub mod generator;
pub mod hasher;
pub mod reset;
pub mod sampler;
pub mod storage;
pub mod types;
pub mod utils;

// Internal modules
mod collections;

pub use comparator::{CompareResult, Difference, StateComparator};
pub use compression::{CompressionEngine, CompressionStrategy};
pub use duplicates::{DuplicateFinder, DuplicateRemoval, DuplicateResult, DuplicateSet, RedundantCopy};
pub use error::{FimError, Result};
pub use fim::{CommitResult, Fim, FimBuilder};
pub use generator::{GlobIgnore, IgnorePredicate, SnapshotGenerator};
pub use hasher::TieredHasher;
pub use reset::{FileReset, ResetField, ResetResult, ResetScope};
pub use storage::Storage;
pub use types::*;
