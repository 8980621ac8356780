use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::stats::digest::TDigest;

/// Quantiles reported in every summary.
pub const REPORTED_QUANTILES: [f64; 7] = [0.01, 0.05, 0.25, 0.5, 0.75, 0.95, 0.99];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantileSource {
    /// Approximate, from the t-digest
    Digest,
    /// Exact over a reservoir sample
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    pub q: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` edges from min to max
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: u64,
    pub skipped: u64,
    pub mean: f64,
    pub std: f64,
    pub variance: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub quantiles: Vec<Quantile>,
    pub quantile_source: QuantileSource,
    pub histogram: Option<Histogram>,
}

impl StatsSummary {
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|quantile| (quantile.q - q).abs() < 1e-12)
            .map(|quantile| quantile.value)
    }
}

/// One-pass statistics for a numeric stream.
///
/// Mean and variance use Welford's update, which avoids the cancellation of
/// the naive sum-of-squares formula. Quantiles come from a bounded t-digest.
#[derive(Debug, Clone)]
pub struct StreamingStats {
    count: u64,
    skipped: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    digest: TDigest,
    histogram_bins: usize,
}

impl Default for StreamingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            skipped: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            digest: TDigest::default(),
            histogram_bins: 20,
        }
    }

    pub fn with_histogram_bins(self, histogram_bins: usize) -> Self {
        Self {
            histogram_bins,
            ..self
        }
    }

    /// Fold a chunk of values. Non-finite values are counted as skipped.
    pub fn update(&mut self, values: &[f64]) {
        for &value in values {
            self.push(value);
        }
    }

    /// Fold values of any primitive numeric type.
    pub fn update_from<N, I>(&mut self, values: I)
    where
        N: ToPrimitive,
        I: IntoIterator<Item = N>,
    {
        for value in values {
            match value.to_f64() {
                Some(v) => self.push(v),
                None => self.skipped += 1,
            }
        }
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            self.skipped += 1;
            return;
        }
        // Welford's algorithm for mean and m2
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;

        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.digest.add(value);
    }

    /// Combine with an accumulator built over a disjoint part of the stream.
    ///
    /// Uses Chan's parallel formula:
    /// - n_c = n_a + n_b
    /// - mu_c = (n_a * mu_a + n_b * mu_b) / n_c
    /// - M2_c = M2_a + M2_b + (mu_b - mu_a)^2 * n_a * n_b / n_c
    pub fn merge(&mut self, other: &StreamingStats) {
        let count = self.count + other.count;
        self.skipped += other.skipped;
        if count == 0 {
            return;
        }
        let (na, nb) = (self.count as f64, other.count as f64);
        let delta = other.mean - self.mean;
        self.mean = (na * self.mean + nb * other.mean) / count as f64;
        self.m2 += other.m2 + delta * delta * na * nb / count as f64;
        self.count = count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.digest.merge(&other.digest);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (divides by N-1)
    pub fn sample_variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Population variance (divides by N)
    pub fn population_variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Standard deviation using sample variance (N-1)
    pub fn std_dev(&self) -> f64 {
        self.sample_variance().sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Derive the summary from the accumulated state.
    ///
    /// Never re-reads data and never double counts, so calling it again
    /// yields the same summary.
    pub fn finalize(&mut self) -> StatsSummary {
        self.digest.compress();
        let quantiles = REPORTED_QUANTILES
            .iter()
            .filter_map(|&q| self.digest.quantile(q).map(|value| Quantile { q, value }))
            .collect();
        self.summary(quantiles, QuantileSource::Digest)
    }

    /// Like [`StreamingStats::finalize`] but with exact quantiles over a sample
    /// of the column instead of the digest.
    pub fn finalize_with_sample(&mut self, sample: &[f64]) -> StatsSummary {
        self.digest.compress();
        let mut sorted: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return self.finalize();
        }
        sorted.sort_by(f64::total_cmp);
        let quantiles = REPORTED_QUANTILES
            .iter()
            .map(|&q| Quantile {
                q,
                value: exact_quantile(&sorted, q),
            })
            .collect();
        self.summary(quantiles, QuantileSource::Sample)
    }

    fn summary(&self, quantiles: Vec<Quantile>, quantile_source: QuantileSource) -> StatsSummary {
        StatsSummary {
            count: self.count,
            skipped: self.skipped,
            mean: self.mean,
            std: self.std_dev(),
            variance: self.sample_variance(),
            min: self.min(),
            max: self.max(),
            quantiles,
            quantile_source,
            histogram: self.histogram(),
        }
    }

    /// Fixed-bin histogram over `[min, max]` derived from the digest CDF.
    fn histogram(&self) -> Option<Histogram> {
        if self.count == 0 || self.histogram_bins == 0 {
            return None;
        }
        if self.min == self.max {
            return Some(Histogram {
                edges: vec![self.min, self.max],
                counts: vec![self.count],
            });
        }
        let bins = self.histogram_bins;
        let width = (self.max - self.min) / bins as f64;
        let edges: Vec<f64> = (0..=bins)
            .map(|i| {
                if i == bins {
                    self.max
                } else {
                    self.min + width * i as f64
                }
            })
            .collect();
        // Rounded cumulative counts keep the total exact
        let total = self.count as f64;
        let cumulative: Vec<u64> = edges
            .iter()
            .enumerate()
            .map(|(i, &edge)| match i {
                0 => 0,
                _ if i == bins => self.count,
                _ => (self.digest.cdf(edge) * total).round() as u64,
            })
            .collect();
        let counts = cumulative
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]))
            .collect();
        Some(Histogram { edges, counts })
    }
}

/// Linear interpolation between closest ranks over a sorted slice.
pub fn exact_quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}
