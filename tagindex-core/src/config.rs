//! Index configuration and default values

use crate::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum log file size before rotation (1MB)
pub const MAX_LOG_FILE_SIZE: u64 = 1024 * 1024;

/// Number of compaction levels, including the log level
pub const DEFAULT_LEVEL_COUNT: usize = 7;

/// Bloom filter bits per metric name in index files
pub const BLOOM_BITS_PER_KEY: usize = 10;

/// HyperLogLog precision (16384 registers, ~0.8% standard error)
pub const HLL_PRECISION: u8 = 14;

/// Per-level parameters for files produced by compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionLevel {
    /// Bloom filter bits per key for index files at this level
    pub bloom_bits_per_key: usize,
}

impl Default for CompactionLevel {
    fn default() -> Self {
        Self {
            bloom_bits_per_key: BLOOM_BITS_PER_KEY,
        }
    }
}

/// Index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding the segment files
    pub path: PathBuf,
    /// Active log file size that triggers rotation
    pub max_log_file_size: u64,
    /// Compaction levels. Level 0 is the log level.
    pub levels: Vec<CompactionLevel>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/index"),
            max_log_file_size: MAX_LOG_FILE_SIZE,
            levels: vec![CompactionLevel::default(); DEFAULT_LEVEL_COUNT],
        }
    }
}

impl IndexConfig {
    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.levels.len() < 2 {
            return Err(IndexError::Config(format!(
                "at least 2 compaction levels required, got {}",
                self.levels.len()
            )));
        }
        if self.max_log_file_size == 0 {
            return Err(IndexError::Config(
                "max_log_file_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Parameters for a level, falling back to the deepest configured level
    pub fn level(&self, level: u32) -> CompactionLevel {
        self.levels
            .get(level as usize)
            .or_else(|| self.levels.last())
            .copied()
            .unwrap_or_default()
    }
}
