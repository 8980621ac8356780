//! Probabilistic fast-reject layer in front of the key tracker.
//!
//! Sized once from an expected item count `n` and a target false-positive
//! rate `p`:
//! - m = -(n ln p) / (ln 2)^2 bits
//! - k = (m / n) ln 2 hash functions
//!
//! Bit positions use double hashing (`h1 + i * h2`) over the two halves of a
//! 128-bit xxh3 digest. No deletion. Inserting more than `n` items only
//! raises the false-positive rate.
use std::f64::consts::LN_2;

use crate::utils::hasher::split_hash;

const MIN_BITS: u64 = 64;

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    expected_items: u64,
    target_rate: f64,
    inserted: u64,
}

impl BloomFilter {
    /// Create a filter for `expected_items` at `false_positive_rate`.
    ///
    /// Rates outside `(0, 1)` are clamped; callers validate them earlier.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as u64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let num_bits = optimal_num_bits(n, p);
        let num_hashes = optimal_num_hashes(num_bits, n);
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: vec![0u64; words],
            num_bits,
            num_hashes,
            expected_items: n,
            target_rate: p,
            inserted: 0,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = split_hash(key);
        for i in 0..self.num_hashes {
            let bit = self.position(h1, h2, i);
            self.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
        self.inserted += 1;
    }

    /// `false` means the key was never inserted. `true` means it may have been.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = split_hash(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.position(h1, h2, i);
            self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
        })
    }

    #[inline]
    fn position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        // An odd step keeps the probe sequence from collapsing when h2 is even.
        let step = h2 | 1;
        h1.wrapping_add((i as u64).wrapping_mul(step)) % self.num_bits
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn expected_items(&self) -> u64 {
        self.expected_items
    }

    pub fn target_false_positive_rate(&self) -> f64 {
        self.target_rate
    }

    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Expected false-positive rate given the current number of inserts:
    /// (1 - e^(-k n / m))^k.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        if self.inserted == 0 {
            return 0.0;
        }
        let k = self.num_hashes as f64;
        let fill = 1.0 - (-k * self.inserted as f64 / self.num_bits as f64).exp();
        fill.powf(k)
    }

    pub fn memory_bytes(&self) -> usize {
        self.bits.len() * std::mem::size_of::<u64>()
    }
}

fn optimal_num_bits(n: u64, p: f64) -> u64 {
    let m = -(n as f64 * p.ln()) / (LN_2 * LN_2);
    (m.ceil() as u64).max(MIN_BITS)
}

fn optimal_num_hashes(m: u64, n: u64) -> u32 {
    let k = (m as f64 / n as f64) * LN_2;
    (k.round() as u32).max(1)
}
