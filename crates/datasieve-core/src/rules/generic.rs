use tracing::warn;

use crate::{
    chunk::{Chunk, ColumnAccessor},
    config::EarlyStopConfig,
    context::RunContext,
    errors::CoreError,
    results::{FailureSample, ValidationResult},
    rules::{PartialOutcome, StreamingRule},
    tracking::KeyTracker,
    utils::key::{display_key, encode_row},
};

/// Rows with a null in any of the columns fail.
pub struct NotNullRule {
    name: String,
    columns: Vec<String>,
    threshold: f64,
    early_stop: Option<EarlyStopConfig>,
}

impl NotNullRule {
    pub fn new(
        name: String,
        columns: Vec<String>,
        threshold: f64,
        early_stop: Option<EarlyStopConfig>,
    ) -> Self {
        Self {
            name,
            columns,
            threshold,
            early_stop,
        }
    }
}

impl StreamingRule for NotNullRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> &'static str {
        "NotNull"
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
        let columns = chunk.columns(&self.columns)?;
        let mut outcome = PartialOutcome {
            rows: chunk.num_rows() as u64,
            ..PartialOutcome::default()
        };
        // Fast path, no nulls at all in this chunk
        if columns.iter().all(|c| c.null_count() == 0) {
            return Ok(outcome);
        }
        for row in 0..chunk.num_rows() {
            if let Some(column) = columns.iter().find(|c| c.is_null(row)) {
                outcome.failed += 1;
                if outcome.samples.len() < sample_room {
                    outcome.samples.push(FailureSample::new(
                        chunk.offset() + row as u64,
                        None,
                        format!("null value in '{}'", column.name()),
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

/// Every occurrence of a key after the first fails. Rows with a null key
/// part are ignored.
pub struct UniqueRule {
    name: String,
    columns: Vec<String>,
    threshold: f64,
    tracker: KeyTracker,
    early_stop: Option<EarlyStopConfig>,
    key: Vec<u8>,
}

impl UniqueRule {
    pub fn new(
        name: String,
        columns: Vec<String>,
        threshold: f64,
        tracker: KeyTracker,
        early_stop: Option<EarlyStopConfig>,
    ) -> Self {
        Self {
            name,
            columns,
            threshold,
            tracker,
            early_stop,
            key: Vec::new(),
        }
    }
}

impl StreamingRule for UniqueRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> &'static str {
        "Unique"
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
        let columns = chunk.columns(&self.columns)?;
        let mut outcome = PartialOutcome::default();
        for row in 0..chunk.num_rows() {
            if self.tracker.stopped_early() {
                break;
            }
            outcome.rows += 1;
            if !encode_row(&columns, row, &mut self.key) {
                continue;
            }
            if !self.tracker.add(&self.key)? {
                outcome.failed += 1;
                if outcome.samples.len() < sample_room {
                    outcome.samples.push(FailureSample::new(
                        chunk.offset() + row as u64,
                        Some(display_key(&self.key)),
                        "duplicate key",
                    ));
                }
            }
        }
        Ok(outcome)
    }

    fn finalize(
        &mut self,
        result: &mut ValidationResult,
        _ctx: &RunContext,
    ) -> Result<(), CoreError> {
        let stats = self.tracker.stats();
        if stats.stopped_early {
            result.metadata.stopped_early = true;
        }
        result.metadata.tracker = Some(stats);
        self.tracker.close()
    }

    fn should_stop(&self) -> bool {
        self.tracker.stopped_early()
    }

    fn early_stop(&self) -> Option<&EarlyStopConfig> {
        self.early_stop.as_ref()
    }
}

impl Drop for UniqueRule {
    fn drop(&mut self) {
        if let Err(e) = self.tracker.close() {
            warn!(rule = %self.name, error = %e, "failed to release key tracker");
        }
    }
}
