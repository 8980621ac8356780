use arrow::array::Array;

use crate::{
    chunk::{Chunk, ColumnAccessor},
    config::EarlyStopConfig,
    context::RunContext,
    errors::CoreError,
    results::FailureSample,
    rules::{PartialOutcome, StreamingRule},
};

/// Values outside `[min, max]` fail. Either bound may be open.
///
/// Nulls pass. A value that does not parse as a number fails.
pub struct RangeRule {
    name: String,
    columns: Vec<String>,
    min: Option<f64>,
    max: Option<f64>,
    threshold: f64,
    early_stop: Option<EarlyStopConfig>,
}

impl RangeRule {
    pub fn new(
        name: String,
        column: String,
        min: Option<f64>,
        max: Option<f64>,
        threshold: f64,
        early_stop: Option<EarlyStopConfig>,
    ) -> Result<Self, CoreError> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(CoreError::config(format!(
                    "range rule '{name}': min {min} is greater than max {max}"
                )));
            }
        }
        if min.is_some_and(f64::is_nan) || max.is_some_and(f64::is_nan) {
            return Err(CoreError::config(format!(
                "range rule '{name}': bounds must not be NaN"
            )));
        }
        Ok(Self {
            name,
            columns: vec![column],
            min,
            max,
            threshold,
            early_stop,
        })
    }

    fn check(&self, value: f64) -> Option<&'static str> {
        if value.is_nan() {
            return Some("not a number");
        }
        if self.min.is_some_and(|min| value < min) {
            return Some("below minimum");
        }
        if self.max.is_some_and(|max| value > max) {
            return Some("above maximum");
        }
        None
    }
}

impl StreamingRule for RangeRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> &'static str {
        "Range"
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
            let reason = if numbers.is_null(row) {
                Some("not numeric")
            } else {
                self.check(numbers.value(row))
            };
            if let Some(reason) = reason {
                outcome.failed += 1;
                if outcome.samples.len() < sample_room {
                    outcome.samples.push(FailureSample::new(
                        chunk.offset() + row as u64,
                        column.value_as_string(row),
                        reason,
                    ));
                }
            }
        }
        Ok(outcome)
    }

    fn early_stop(&self) -> Option<&EarlyStopConfig> {
        self.early_stop.as_ref()
    }
}
