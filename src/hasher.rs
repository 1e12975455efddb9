//! Tiered content hashing
//!
//! A file is read once, front to back. Up to three accumulators watch the
//! stream:
//!
//! - **small block**: SHA-512 over the [`BlockSampler`] ranges for 4 KiB blocks
//! - **medium block**: SHA-512 over the ranges for 1 MiB blocks
//! - **full**: SHA-512 over every byte
//!
//! Each accumulator is a small state machine holding its pending ranges and
//! its running digest. The read loop hands every chunk to every active
//! accumulator through [`TierAccumulator::feed`]; an accumulator digests
//! only the part of the chunk that falls inside its next pending range.
//! When no accumulator wants the bytes at the current position the loop
//! seeks forward to the nearest pending range, so the sampled tiers cost
//! O(1) reads per file whatever its size.
//!
//! A block tier digest is the hash of its sampled ranges concatenated in
//! ascending order. It is not salted by position, so identical sampled bytes
//! always give identical digests. Digests are stored as Ascii85 text.
//!
//! ## Example
//!
//! ```rust
//! use fim::hasher::TieredHasher;
//! use fim::types::{HashMode, NO_HASH};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let content = vec![7u8; 10_000];
//! let report = TieredHasher::new(HashMode::HashSmallBlock)
//!     .hash_reader(Cursor::new(&content), content.len() as u64)?;
//!
//! assert_ne!(report.hash.small_block_hash, NO_HASH);
//! assert_eq!(report.hash.full_hash, NO_HASH);
//! assert!(report.complete);
//! # Ok(())
//! # }
//! ```

use crate::ascii85;
use crate::error::{FimError, Result};
use crate::sampler::{BlockSampler, Range};
use crate::types::{ContentHash, HashMode, MEDIUM_BLOCK_SIZE, NO_HASH, SMALL_BLOCK_SIZE};
use sha2::{Digest, Sha512};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

/// Default read buffer
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// The three hash tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Sampled small blocks
    SmallBlock,
    /// Sampled medium blocks
    MediumBlock,
    /// Every byte
    Full,
}

impl Tier {
    fn is_active(self, mode: HashMode) -> bool {
        match self {
            Tier::SmallBlock => mode.computes_small_block(),
            Tier::MediumBlock => mode.computes_medium_block(),
            Tier::Full => mode.computes_full(),
        }
    }
}

/// Running digest for one tier
///
/// Inactive accumulators hold no digest, consume nothing and finish as
/// [`NO_HASH`].
#[derive(Debug, Clone)]
pub struct TierAccumulator {
    tier: Tier,
    pending: VecDeque<Range>,
    digest: Option<Sha512>,
    bytes_hashed: u64,
    size_to_hash: u64,
}

impl TierAccumulator {
    /// Accumulator for `tier` over a file of `file_length` bytes
    pub fn new(tier: Tier, file_length: u64, active: bool) -> Self {
        if !active {
            return Self {
                tier,
                pending: VecDeque::new(),
                digest: None,
                bytes_hashed: 0,
                size_to_hash: 0,
            };
        }

        let (pending, size_to_hash) = match tier {
            Tier::SmallBlock => Self::sampled(file_length, SMALL_BLOCK_SIZE),
            Tier::MediumBlock => Self::sampled(file_length, MEDIUM_BLOCK_SIZE),
            // unbounded so that bytes beyond the declared length still count
            Tier::Full => (VecDeque::from([Range::new(0, u64::MAX)]), file_length),
        };

        Self {
            tier,
            pending,
            digest: Some(Sha512::new()),
            bytes_hashed: 0,
            size_to_hash,
        }
    }

    fn sampled(file_length: u64, block_size: u64) -> (VecDeque<Range>, u64) {
        let sampler = BlockSampler::new(file_length, block_size);
        let size = sampler.size_to_hash();
        (sampler.into_ranges().into(), size)
    }

    /// Tier this accumulator computes
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Whether the tier is computed at all
    pub fn is_active(&self) -> bool {
        self.digest.is_some()
    }

    /// Next pending range ending after `position`
    pub fn next_range(&self, position: u64) -> Option<Range> {
        self.pending.iter().find(|range| range.to > position).copied()
    }

    /// Digest the part of `bytes` (starting at file offset `chunk_start`) that
    /// falls inside pending ranges
    pub fn feed(&mut self, chunk_start: u64, bytes: &[u8]) {
        let Some(digest) = self.digest.as_mut() else {
            return;
        };
        let chunk = Range::new(chunk_start, chunk_start + bytes.len() as u64);

        while let Some(front) = self.pending.front().copied() {
            if front.to <= chunk.from {
                // passed without being seen
                self.pending.pop_front();
                continue;
            }
            let Some(overlap) = front.intersection(&chunk) else {
                break;
            };

            let start = (overlap.from - chunk.from) as usize;
            let end = (overlap.to - chunk.from) as usize;
            digest.update(&bytes[start..end]);
            self.bytes_hashed += overlap.len();

            if front.to <= chunk.to {
                self.pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes digested so far
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Bytes the tier expected to digest
    pub fn size_to_hash(&self) -> u64 {
        self.size_to_hash
    }

    /// Whether every expected byte was digested
    ///
    /// Inactive tiers are trivially complete.
    pub fn hash_complete(&self) -> bool {
        self.bytes_hashed == self.size_to_hash
    }

    /// Finalize into Ascii85 text, or [`NO_HASH`] when inactive
    pub fn finish(self) -> String {
        match self.digest {
            Some(digest) => ascii85::encode(&digest.finalize()),
            None => NO_HASH.to_string(),
        }
    }
}

/// Result of hashing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashReport {
    /// Tier digests
    pub hash: ContentHash,
    /// Bytes actually read from the stream
    pub bytes_read: u64,
    /// Whether every active tier consumed all of its expected bytes
    pub complete: bool,
}

/// Single-pass, multi-tier file hasher
#[derive(Debug, Clone)]
pub struct TieredHasher {
    mode: HashMode,
    buffer_size: usize,
}

impl TieredHasher {
    /// Hasher computing the tiers enabled by `mode`
    pub fn new(mode: HashMode) -> Self {
        Self {
            mode,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Change the read buffer size (minimum 1 byte)
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Mode this hasher runs with
    pub fn mode(&self) -> HashMode {
        self.mode
    }

    /// Hash the file at `path`, sampling according to `declared_length`
    ///
    /// Under [`HashMode::DontHash`] the file is not opened.
    ///
    /// # Errors
    ///
    /// [`FimError::FileRead`] if the file cannot be opened or read.
    pub fn hash_file(&self, path: &Path, declared_length: u64) -> Result<ContentHash> {
        self.hash_file_report(path, declared_length)
            .map(|report| report.hash)
    }

    /// Like [`hash_file`](Self::hash_file) but also returns the read statistics
    pub fn hash_file_report(&self, path: &Path, declared_length: u64) -> Result<HashReport> {
        if !self.mode.hashes_content() {
            return Ok(HashReport {
                hash: ContentHash::no_hash(),
                bytes_read: 0,
                complete: true,
            });
        }

        let file = File::open(path).map_err(|e| FimError::file_read(path, e))?;
        let report = self
            .hash_reader(file, declared_length)
            .map_err(|e| FimError::file_read(path, e))?;

        if report.bytes_read != declared_length && self.mode.computes_full() {
            trace!(
                "{:?} changed while hashing: declared {} bytes, read {}",
                path,
                declared_length,
                report.bytes_read
            );
        }
        Ok(report)
    }

    /// Hash any seekable stream
    pub fn hash_reader<R: Read + Seek>(&self, mut reader: R, declared_length: u64) -> io::Result<HashReport> {
        let mut tiers = [
            TierAccumulator::new(Tier::SmallBlock, declared_length, Tier::SmallBlock.is_active(self.mode)),
            TierAccumulator::new(Tier::MediumBlock, declared_length, Tier::MediumBlock.is_active(self.mode)),
            TierAccumulator::new(Tier::Full, declared_length, Tier::Full.is_active(self.mode)),
        ];

        let mut buffer = vec![0u8; self.buffer_size];
        let mut position = 0u64;
        let mut bytes_read = 0u64;

        while let Some(wanted) = next_wanted_range(&tiers, position) {
            if wanted.from > position {
                reader.seek(SeekFrom::Start(wanted.from))?;
                position = wanted.from;
            }

            let limit = (wanted.to - position).min(buffer.len() as u64) as usize;
            let read = match reader.read(&mut buffer[..limit]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            for tier in tiers.iter_mut() {
                tier.feed(position, &buffer[..read]);
            }
            position += read as u64;
            bytes_read += read as u64;
        }

        let complete = tiers.iter().all(TierAccumulator::hash_complete);
        let [small, medium, full] = tiers;
        Ok(HashReport {
            hash: ContentHash {
                small_block_hash: small.finish(),
                medium_block_hash: medium.finish(),
                full_hash: full.finish(),
            },
            bytes_read,
            complete,
        })
    }
}

/// Earliest byte any tier still needs, up to the end of the nearest range
/// starting there
///
/// Reads never go past that end, so a seek can follow immediately when the
/// next pending range starts further on.
fn next_wanted_range(tiers: &[TierAccumulator], position: u64) -> Option<Range> {
    let ranges: Vec<Range> = tiers
        .iter()
        .filter_map(|tier| tier.next_range(position))
        .map(|range| Range::new(range.from.max(position), range.to))
        .collect();

    let from = ranges.iter().map(|range| range.from).min()?;
    let to = ranges
        .iter()
        .filter(|range| range.from == from)
        .map(|range| range.to)
        .min()?;
    Some(Range::new(from, to))
}
