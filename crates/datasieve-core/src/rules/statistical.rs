//! Z-score outlier detection over a bounded sample.
//!
//! Mean and standard deviation are exact over the whole stream. Outliers
//! are counted in a reservoir sample and extrapolated to the stream with a
//! Wald interval, so memory stays bounded whatever the stream length.
use arrow::array::Array;
use tracing::{debug, warn};

use crate::{
    chunk::{Chunk, ColumnAccessor},
    context::RunContext,
    errors::CoreError,
    results::{FailureSample, SamplingInfo, ValidationResult},
    rules::{PartialOutcome, StreamingRule},
    sampling::{ReservoirSampler, estimate_population},
    stats::StreamingStats,
};

pub struct OutlierRule {
    name: String,
    columns: Vec<String>,
    z_threshold: f64,
    threshold: f64,
    stats: StreamingStats,
    sample: ReservoirSampler<(u64, f64)>,
}

impl OutlierRule {
    pub fn new(
        name: String,
        column: String,
        z_threshold: f64,
        threshold: f64,
        sample_size: usize,
        seed: u64,
    ) -> Result<Self, CoreError> {
        if !(z_threshold > 0.0 && z_threshold.is_finite()) {
            return Err(CoreError::config(format!(
                "outlier rule '{name}': z_threshold must be positive, got {z_threshold}"
            )));
        }
        Ok(Self {
            name,
            columns: vec![column],
            z_threshold,
            threshold,
            stats: StreamingStats::new(),
            sample: ReservoirSampler::new(sample_size, seed),
        })
    }
}

impl StreamingRule for OutlierRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> &'static str {
        "Outlier"
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn process(
        &mut self,
        chunk: &Chunk,
        sample_room: usize,
        _ctx: &RunContext,
    ) -> Result<PartialOutcome, CoreError> {
        let column = chunk.column(&self.columns[0])?;
        let numbers = column.numeric_view()?;
        let mut outcome = PartialOutcome {
            rows: chunk.num_rows() as u64,
            ..PartialOutcome::default()
        };
        for row in 0..chunk.num_rows() {
            if column.is_null(row) {
                continue;
            }
            let row_number = chunk.offset() + row as u64;
            if numbers.is_null(row) || !numbers.value(row).is_finite() {
                outcome.failed += 1;
                if outcome.samples.len() < sample_room {
                    outcome.samples.push(FailureSample::new(
                        row_number,
                        column.value_as_string(row),
                        "not numeric",
                    ));
                }
                continue;
            }
            let value = numbers.value(row);
            self.stats.push(value);
            self.sample.add((row_number, value));
        }
        Ok(outcome)
    }

    fn finalize(
        &mut self,
        result: &mut ValidationResult,
        ctx: &RunContext,
    ) -> Result<(), CoreError> {
        let mean = self.stats.mean();
        let std = self.stats.std_dev();
        let mut outliers: Vec<(u64, f64)> = if std > 0.0 {
            self.sample
                .sample()
                .iter()
                .copied()
                .filter(|(_, value)| ((value - mean) / std).abs() > self.z_threshold)
                .collect()
        } else {
            Vec::new()
        };
        outliers.sort_by_key(|(row, _)| *row);

        let estimate = estimate_population(
            outliers.len() as u64,
            self.sample.len() as u64,
            self.sample.seen(),
            ctx.config().sampling.confidence_level,
        )?;
        let exhaustive = !self.sample.is_saturated();
        let failed = if exhaustive {
            outliers.len() as u64
        } else {
            warn!(
                rule = %self.name,
                sample_size = self.sample.len(),
                rows = self.sample.seen(),
                "reservoir saturated, outlier count is an estimate"
            );
            estimate.estimated_total.round() as u64
        };
        debug!(
            rule = %self.name,
            mean,
            std,
            sampled = self.sample.len(),
            outliers = outliers.len(),
            estimated = failed,
            "outlier scan complete"
        );

        let samples = outliers
            .iter()
            .take(result.sample_room())
            .map(|(row, value)| {
                FailureSample::new(
                    *row,
                    Some(value.to_string()),
                    format!("z-score {:.2} exceeds {}", (value - mean) / std, self.z_threshold),
                )
            })
            .collect();
        result.add_failures(failed, samples);
        result.metadata.sampling = Some(SamplingInfo {
            method: "reservoir",
            exhaustive,
            estimate,
        });
        Ok(())
    }
}
