//! Merging t-digest for bounded-memory quantiles.
//!
//! Values are buffered and periodically merged into a sorted list of
//! centroids whose sizes follow the k1 scale function
//! `k(q) = δ / (2π) · asin(2q - 1)`, which keeps centroids small near the
//! tails. The number of centroids is O(δ) regardless of stream length.
use std::f64::consts::PI;

const DEFAULT_COMPRESSION: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Centroid {
    mean: f64,
    weight: f64,
}

#[derive(Debug, Clone)]
pub struct TDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    buffer: Vec<Centroid>,
    buffer_cap: usize,
    total_weight: f64,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION)
    }
}

impl TDigest {
    pub fn new(compression: f64) -> Self {
        let compression = compression.max(10.0);
        Self {
            compression,
            centroids: Vec::new(),
            buffer: Vec::new(),
            buffer_cap: (compression as usize) * 10,
            total_weight: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.add_weighted(value, 1.0);
    }

    fn add_weighted(&mut self, mean: f64, weight: f64) {
        if !mean.is_finite() || weight <= 0.0 {
            return;
        }
        self.min = self.min.min(mean);
        self.max = self.max.max(mean);
        self.total_weight += weight;
        self.buffer.push(Centroid { mean, weight });
        if self.buffer.len() >= self.buffer_cap {
            self.compress();
        }
    }

    /// Fold another digest into this one.
    pub fn merge(&mut self, other: &TDigest) {
        for c in other.centroids.iter().chain(other.buffer.iter()) {
            self.add_weighted(c.mean, c.weight);
        }
    }

    pub fn count(&self) -> f64 {
        self.total_weight
    }

    pub fn centroid_count(&self) -> usize {
        self.centroids.len() + self.buffer.len()
    }

    fn k_scale(&self, q: f64) -> f64 {
        self.compression / (2.0 * PI) * (2.0 * q - 1.0).asin()
    }

    fn k_inverse(&self, k: f64) -> f64 {
        let k = k.min(self.compression / 4.0);
        ((2.0 * PI * k / self.compression).sin() + 1.0) / 2.0
    }

    /// Merge buffered values into the centroid list. No-op on an empty buffer,
    /// so repeated calls never change the digest.
    pub fn compress(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut all: Vec<Centroid> = Vec::with_capacity(self.centroids.len() + self.buffer.len());
        all.append(&mut self.centroids);
        all.append(&mut self.buffer);
        all.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        let total = self.total_weight;
        let mut merged: Vec<Centroid> = Vec::with_capacity(self.compression as usize * 2);
        let mut iter = all.into_iter();
        let Some(mut current) = iter.next() else {
            return;
        };
        let mut weight_so_far = 0.0;
        let mut limit = total * self.k_inverse(self.k_scale(0.0) + 1.0);

        for next in iter {
            if weight_so_far + current.weight + next.weight <= limit {
                let weight = current.weight + next.weight;
                current.mean += (next.mean - current.mean) * next.weight / weight;
                current.weight = weight;
            } else {
                weight_so_far += current.weight;
                merged.push(current);
                limit = total * self.k_inverse(self.k_scale(weight_so_far / total) + 1.0);
                current = next;
            }
        }
        merged.push(current);
        self.centroids = merged;
    }

    /// Estimated value at quantile `q` in `[0, 1]`.
    ///
    /// Call [`TDigest::compress`] first to include buffered values.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let centroids = &self.centroids;
        if centroids.is_empty() {
            return None;
        }
        if q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }
        if centroids.len() == 1 {
            return Some(centroids[0].mean);
        }

        let target = q * self.total_weight;
        let first = centroids[0];
        if target < first.weight / 2.0 {
            let t = target / (first.weight / 2.0);
            return Some(self.min + t * (first.mean - self.min));
        }

        let mut cumulative = 0.0;
        for pair in centroids.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let left_center = cumulative + left.weight / 2.0;
            let right_center = cumulative + left.weight + right.weight / 2.0;
            if target <= right_center {
                let t = (target - left_center) / (right_center - left_center);
                return Some(left.mean + t * (right.mean - left.mean));
            }
            cumulative += left.weight;
        }

        let last = centroids[centroids.len() - 1];
        let last_center = self.total_weight - last.weight / 2.0;
        let t = ((target - last_center) / (last.weight / 2.0)).clamp(0.0, 1.0);
        Some(last.mean + t * (self.max - last.mean))
    }

    /// Estimated fraction of values `<= x`.
    pub fn cdf(&self, x: f64) -> f64 {
        let centroids = &self.centroids;
        if centroids.is_empty() || x < self.min {
            return 0.0;
        }
        if x >= self.max {
            return 1.0;
        }
        let total = self.total_weight;
        let first = centroids[0];
        if x < first.mean {
            let span = first.mean - self.min;
            let t = if span > 0.0 { (x - self.min) / span } else { 1.0 };
            return t * first.weight / 2.0 / total;
        }

        let mut cumulative = 0.0;
        for pair in centroids.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            if x < right.mean {
                let left_center = cumulative + left.weight / 2.0;
                let right_center = cumulative + left.weight + right.weight / 2.0;
                let span = right.mean - left.mean;
                let t = if span > 0.0 { (x - left.mean) / span } else { 1.0 };
                return (left_center + t * (right_center - left_center)) / total;
            }
            cumulative += left.weight;
        }

        let last = centroids[centroids.len() - 1];
        let last_center = total - last.weight / 2.0;
        let span = self.max - last.mean;
        let t = if span > 0.0 { (x - last.mean) / span } else { 1.0 };
        (last_center + t * last.weight / 2.0) / total
    }
}
