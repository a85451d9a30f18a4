//! Dense HyperLogLog sketch

use super::Sketch;
use crate::{IndexError, Result};
use xxhash_rust::xxh3::xxh3_64;

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 18;

/// HyperLogLog with `2^precision` one-byte registers.
///
/// Standard error is roughly `1.04 / sqrt(2^precision)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Create a sketch. Precision is clamped to 4..=18.
    pub fn new(precision: u8) -> Self {
        let precision = precision.clamp(MIN_PRECISION, MAX_PRECISION);
        Self {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    /// Sketch with the crate default precision
    pub fn with_default_precision() -> Self {
        Self::new(crate::config::HLL_PRECISION)
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Estimated memory footprint in bytes
    pub fn bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.registers.len()
    }

    fn alpha(m: f64) -> f64 {
        match m as usize {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        }
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::with_default_precision()
    }
}

impl Sketch for HyperLogLog {
    fn add(&mut self, value: &[u8]) {
        let hash = xxh3_64(value);
        let p = self.precision as u32;
        let idx = (hash >> (64 - p)) as usize;
        // Sentinel bit bounds the rank when the remaining bits are all zero
        let rest = (hash << p) | (1 << (p - 1));
        let rank = rest.leading_zeros() as u8 + 1;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    fn count(&self) -> u64 {
        let m = self.registers.len() as f64;
        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &r in &self.registers {
            sum += 2f64.powi(-(r as i32));
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = Self::alpha(m) * m * m / sum;
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            // Linear counting for the small range
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }

    fn merge(&mut self, other: &Self) -> Result<()> {
        if other.precision != self.precision {
            return Err(IndexError::SketchMismatch {
                expected: self.precision,
                actual: other.precision,
            });
        }
        for (a, &b) in self.registers.iter_mut().zip(&other.registers) {
            if b > *a {
                *a = b;
            }
        }
        Ok(())
    }
}
