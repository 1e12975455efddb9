//! Bounded block sampling
//!
//! Maps a file length and a block size to at most three byte ranges. The
//! small and medium hash tiers only digest these ranges, so their cost does
//! not grow with file size.
//!
//! With `full_blocks = length / block_size`:
//!
//! - `0` complete blocks: the whole (short) file is one range
//! - `1` complete block: the first block
//! - otherwise: block indices `1`, `full_blocks / 2` and `full_blocks - 1`,
//!   duplicates collapsed, in ascending order
//!
//! Block 0 is skipped once there is a choice because file headers make it
//! the block most likely to be shared by unrelated files.
//!
//! ```rust
//! use fim::sampler::{BlockSampler, Range};
//!
//! let sampler = BlockSampler::new(20_989, 4096);
//! assert_eq!(
//!     sampler.ranges(),
//!     &[Range::new(4096, 8192), Range::new(8192, 12288), Range::new(16384, 20480)]
//! );
//! assert_eq!(sampler.next_range(9000), Some(Range::new(8192, 12288)));
//! assert_eq!(sampler.next_range(20480), None);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte interval `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    /// First byte, inclusive
    pub from: u64,
    /// End, exclusive
    pub to: u64,
}

impl Range {
    /// Create a range; `from` must not exceed `to`
    pub fn new(from: u64, to: u64) -> Self {
        debug_assert!(from <= to, "invalid range {}..{}", from, to);
        Self { from, to }
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    /// Whether the range covers no byte
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Overlap with another range, if any
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        (from < to).then(|| Range::new(from, to))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// Sample ranges for a file of `file_length` bytes with blocks of `block_size`
///
/// # Panics
///
/// Panics if `block_size` is zero.
pub fn sample(file_length: u64, block_size: u64) -> Vec<Range> {
    assert!(block_size > 0, "block size must be positive");

    let full_blocks = file_length / block_size;
    match full_blocks {
        0 => vec![Range::new(0, file_length)],
        1 => vec![Range::new(0, block_size)],
        _ => {
            let mut indices = vec![1, full_blocks / 2, full_blocks - 1];
            indices.sort_unstable();
            indices.dedup();
            indices
                .into_iter()
                .map(|index| Range::new(index * block_size, (index + 1) * block_size))
                .collect()
        }
    }
}

/// Precomputed sample ranges for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSampler {
    block_size: u64,
    ranges: Vec<Range>,
}

impl BlockSampler {
    /// Compute the sample for a file
    pub fn new(file_length: u64, block_size: u64) -> Self {
        Self {
            block_size,
            ranges: sample(file_length, block_size),
        }
    }

    /// Block size this sampler was built with
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Sampled ranges, ascending
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Total bytes the sample covers
    pub fn size_to_hash(&self) -> u64 {
        self.ranges.iter().map(Range::len).sum()
    }

    /// First sampled range whose end lies beyond `after_position`
    ///
    /// Ranges a forward-only scan has already passed are skipped.
    pub fn next_range(&self, after_position: u64) -> Option<Range> {
        self.ranges
            .iter()
            .find(|range| range.to > after_position)
            .copied()
    }

    /// Consume the sampler, returning its ranges
    pub fn into_ranges(self) -> Vec<Range> {
        self.ranges
    }
}
