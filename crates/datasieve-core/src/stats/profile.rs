use arrow_array::Array;
use serde::Serialize;

use crate::{
    chunk::{Chunk, ColumnAccessor},
    errors::CoreError,
    sampling::{ReservoirSampler, StratifiedSampler, StratifiedStats},
    stats::{
        frequency::{FrequencyCounter, ValueCount},
        streaming::{StatsSummary, StreamingStats},
    },
};

/// Finalized profile of one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub column: String,
    pub total_rows: u64,
    pub null_count: u64,
    pub non_numeric_count: u64,
    /// Present when at least one value was numeric
    pub stats: Option<StatsSummary>,
    pub top_values: Vec<ValueCount>,
    pub distinct_truncated: bool,
    /// One entry per stratum, ordered by category
    pub strata: Vec<StratumProfile>,
    pub strata_sampling: Option<StratifiedStats>,
    pub error: Option<String>,
}

/// Statistics over the sampled values of one stratum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumProfile {
    pub category: String,
    pub stats: StatsSummary,
}

/// Stratum assigned to rows whose stratum value is null.
pub const NULL_STRATUM: &str = "<null>";

struct Strata {
    column: String,
    sampler: StratifiedSampler<f64>,
}

/// Accumulates a [`ColumnProfile`] chunk by chunk.
pub struct ColumnProfiler {
    column: String,
    total_rows: u64,
    null_count: u64,
    non_numeric_count: u64,
    stats: StreamingStats,
    frequencies: FrequencyCounter,
    sample: Option<ReservoirSampler<f64>>,
    strata: Option<Strata>,
    top_k: usize,
    error: Option<String>,
}

impl ColumnProfiler {
    pub fn new(column: impl Into<String>, top_k: usize, max_tracked: usize, bins: usize) -> Self {
        Self {
            column: column.into(),
            total_rows: 0,
            null_count: 0,
            non_numeric_count: 0,
            stats: StreamingStats::new().with_histogram_bins(bins),
            frequencies: FrequencyCounter::new(max_tracked),
            sample: None,
            strata: None,
            top_k,
            error: None,
        }
    }

    /// Keep a reservoir of numeric values and report exact quantiles over it.
    pub fn with_sample(self, capacity: usize, seed: u64) -> Self {
        Self {
            sample: Some(ReservoirSampler::new(capacity, seed)),
            ..self
        }
    }

    /// Sample numeric values per value of the `by` column.
    pub fn with_strata(self, by: impl Into<String>, per_category: usize, global_cap: usize) -> Self {
        Self {
            strata: Some(Strata {
                column: by.into(),
                sampler: StratifiedSampler::new(per_category, global_cap),
            }),
            ..self
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// A profiler that hit a schema or resource error ignores later chunks.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn update(&mut self, chunk: &Chunk) -> Result<(), CoreError> {
        if self.error.is_some() {
            return Ok(());
        }
        let column = chunk.column(&self.column)?;
        let numeric = column.numeric_view()?;
        let text = column.text_view()?;
        let strata_column = match &self.strata {
            Some(strata) => Some(chunk.column(&strata.column)?),
            None => None,
        };
        let categories = strata_column
            .as_ref()
            .map(|c| c.text_view())
            .transpose()?;

        self.total_rows += column.len() as u64;
        self.null_count += column.null_count() as u64;
        for row in 0..column.len() {
            if column.is_null(row) {
                continue;
            }
            if text.is_valid(row) {
                self.frequencies.add(text.value(row));
            }
            if numeric.is_valid(row) {
                let value = numeric.value(row);
                self.stats.push(value);
                if let Some(sample) = self.sample.as_mut() {
                    sample.add(value);
                }
                if let (Some(strata), Some(categories)) = (self.strata.as_mut(), categories) {
                    let category = if categories.is_valid(row) {
                        categories.value(row)
                    } else {
                        NULL_STRATUM
                    };
                    strata.sampler.add(value, category);
                }
            } else {
                self.non_numeric_count += 1;
            }
        }
        Ok(())
    }

    pub fn fail(&mut self, error: &CoreError) {
        self.error = Some(error.to_string());
    }

    /// Safe to call repeatedly.
    pub fn finalize(&mut self) -> ColumnProfile {
        let stats = (self.stats.count() > 0).then(|| match &self.sample {
            Some(sample) => self.stats.finalize_with_sample(sample.sample()),
            None => self.stats.finalize(),
        });
        let (strata, strata_sampling) = match &self.strata {
            Some(strata) => (
                strata
                    .sampler
                    .strata()
                    .iter()
                    .map(|(category, values)| StratumProfile {
                        category: category.clone(),
                        stats: stratum_stats(values),
                    })
                    .collect(),
                Some(strata.sampler.stats()),
            ),
            None => (Vec::new(), None),
        };
        ColumnProfile {
            column: self.column.clone(),
            total_rows: self.total_rows,
            null_count: self.null_count,
            non_numeric_count: self.non_numeric_count,
            stats,
            top_values: self.frequencies.top_k(self.top_k),
            distinct_truncated: self.frequencies.is_truncated(),
            strata,
            strata_sampling,
            error: self.error.clone(),
        }
    }
}

fn stratum_stats(values: &[f64]) -> StatsSummary {
    let mut stats = StreamingStats::new().with_histogram_bins(0);
    stats.update(values);
    stats.finalize_with_sample(values)
}
