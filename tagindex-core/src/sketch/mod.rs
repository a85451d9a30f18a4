//! Cardinality estimation
//!
//! Files keep two sketches per scope: one fed by additions and one fed by
//! tombstones. Sketches from many files are combined with `merge`, which is
//! commutative and associative.

mod hll;

pub use hll::HyperLogLog;

use crate::Result;

/// Mergeable approximate distinct counter
pub trait Sketch: Send + Sync {
    /// Record a value
    fn add(&mut self, value: &[u8]);

    /// Estimated number of distinct values recorded
    fn count(&self) -> u64;

    /// Fold `other` into `self`
    fn merge(&mut self, other: &Self) -> Result<()>
    where
        Self: Sized;
}
