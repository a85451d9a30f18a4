//! Bloom filter over metric names in index files

use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Bloom filter using double hashing
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomFilter {
    /// Create a filter sized for `num_keys` keys
    pub fn new(num_keys: usize, bits_per_key: usize) -> Self {
        let num_bits = (num_keys * bits_per_key).max(64);
        let num_bytes = (num_bits + 7) / 8;

        // Optimal number of hash functions
        let num_hashes = ((bits_per_key as f64) * 0.69).round() as usize;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Add a key to the filter
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Check if a key may be in the set
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_position(h1, h2, i);
            (self.bits[bit / 8] >> (bit % 8)) & 1 == 1
        })
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Size of the bit array in bytes
    pub fn bytes(&self) -> usize {
        self.bits.len()
    }

    fn hash_key(key: &[u8]) -> (u64, u64) {
        let h1 = xxh3_64(key);
        let h2 = xxh3_64_with_seed(key, h1) | 1;
        (h1, h2)
    }

    fn bit_position(&self, h1: u64, h2: u64, i: usize) -> usize {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash % self.num_bits as u64) as usize
    }
}
