//! LZ4 framing for persisted snapshots
//!
//! Snapshot files start with a 4-byte header:
//! - `LZ4F`: LZ4 block with a prepended size follows
//! - `\0\0\0\0`: the payload is stored as is
//!
//! Payloads are only stored compressed when that makes them smaller.
//!
//! ```rust
//! use fim::compression::{CompressionEngine, CompressionStrategy};
//!
//! let mut engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let payload = b"fingerprint ".repeat(64);
//! let framed = engine.compress(&payload).unwrap();
//! assert!(framed.starts_with(b"LZ4F"));
//! assert_eq!(engine.decompress(&framed).unwrap(), payload);
//! ```

use crate::error::{FimError, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::time::Instant;
use tracing::{debug, trace};

const LZ4_MAGIC: &[u8; 4] = b"LZ4F";
const RAW_MAGIC: &[u8; 4] = &[0, 0, 0, 0];

/// Payloads shorter than this are never worth compressing
const MIN_COMPRESS_SIZE: usize = 64;

/// Whether snapshots are compressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Always store raw
    None,
    /// LZ4 whenever it saves space
    #[default]
    Fast,
}

impl CompressionStrategy {
    /// Strategy matching the `compress_snapshots` setting
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CompressionStrategy::Fast
        } else {
            CompressionStrategy::None
        }
    }
}

/// Counters kept by a [`CompressionEngine`]
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Payloads stored compressed
    pub compressed: usize,
    /// Payloads stored raw
    pub stored_raw: usize,
    /// Bytes saved by compression
    pub bytes_saved: usize,
    /// Time spent compressing, in milliseconds
    pub compression_time_ms: u64,
}

impl CompressionStats {
    /// Share of payloads stored compressed (0.0 to 1.0)
    pub fn compression_ratio(&self) -> f64 {
        let total = self.compressed + self.stored_raw;
        if total == 0 {
            return 0.0;
        }
        self.compressed as f64 / total as f64
    }
}

/// Frames and unframes snapshot payloads
#[derive(Debug, Default)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: CompressionStats,
}

impl CompressionEngine {
    /// Engine applying `strategy`
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            stats: CompressionStats::default(),
        }
    }

    /// Counters since creation
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Frame a payload, compressing it when allowed and beneficial
    pub fn compress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();

        if self.strategy == CompressionStrategy::None || content.len() < MIN_COMPRESS_SIZE {
            trace!("Storing {} bytes raw", content.len());
            return Ok(self.store_raw(content));
        }

        let compressed = compress_prepend_size(content);
        if compressed.len() >= content.len() {
            trace!("Compression not beneficial for {} bytes", content.len());
            return Ok(self.store_raw(content));
        }

        let saved = content.len() - compressed.len();
        self.stats.compressed += 1;
        self.stats.bytes_saved += saved;
        self.stats.compression_time_ms += start.elapsed().as_millis() as u64;
        debug!(
            "Compressed snapshot: {} -> {} bytes ({:.1}% saved)",
            content.len(),
            compressed.len(),
            saved as f64 / content.len() as f64 * 100.0
        );

        let mut framed = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
        framed.extend_from_slice(LZ4_MAGIC);
        framed.extend_from_slice(&compressed);
        Ok(framed)
    }

    /// Unframe a payload written by [`compress`](Self::compress)
    ///
    /// # Errors
    ///
    /// [`FimError::Decompression`] on a short input, an unknown header or a
    /// damaged LZ4 block.
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(FimError::decompression("content too short"));
        }

        let (magic, payload) = content.split_at(4);
        if magic == LZ4_MAGIC {
            decompress_size_prepended(payload)
                .map_err(|e| FimError::decompression(format!("LZ4 decompression failed: {}", e)))
        } else if magic == RAW_MAGIC {
            Ok(payload.to_vec())
        } else {
            Err(FimError::decompression(format!(
                "unknown snapshot header {:02x?}",
                magic
            )))
        }
    }

    fn store_raw(&mut self, content: &[u8]) -> Vec<u8> {
        self.stats.stored_raw += 1;
        let mut framed = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        framed.extend_from_slice(RAW_MAGIC);
        framed.extend_from_slice(content);
        framed
    }
}
