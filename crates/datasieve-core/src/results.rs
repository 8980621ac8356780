//! Result records produced by a run.
use serde::Serialize;

use crate::{
    errors::{CoreError, ErrorKind},
    matching::MatchReport,
    sampling::{Decision, PopulationEstimate},
    stats::ColumnProfile,
    tracking::TrackerStats,
};

/// One failing row kept as evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSample {
    /// Stream-wide row number, when the failure belongs to a row
    pub row: Option<u64>,
    pub value: Option<String>,
    pub reason: String,
}

impl FailureSample {
    pub fn new(row: u64, value: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            value,
            reason: reason.into(),
        }
    }

    /// A failure that is not tied to a subject row, e.g. a reference key never seen.
    pub fn detached(value: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            row: None,
            value,
            reason: reason.into(),
        }
    }
}

/// How a sample-based estimate was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingInfo {
    pub method: &'static str,
    /// The sample held every value, so the counts are exact.
    pub exhaustive: bool,
    pub estimate: PopulationEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarlyStopInfo {
    pub decision: Decision,
    pub rows_evaluated: u64,
    pub failures_observed: u64,
    pub log_likelihood_ratio: f64,
    pub accept_bound: f64,
    pub reject_bound: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_stop: Option<EarlyStopInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_report: Option<MatchReport>,
    /// The rule stopped before the end of the stream.
    pub stopped_early: bool,
}

/// Outcome of one rule instance.
///
/// Mutated chunk by chunk through [`ValidationResult::merge`], then closed
/// with [`ValidationResult::finalize`]. Once finalized every mutator is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub rule_name: String,
    pub rule_type: String,
    pub columns: Vec<String>,
    pub passed: bool,
    pub total_rows: u64,
    pub failed_rows: u64,
    pub failure_percentage: f64,
    /// Allowed failure percentage
    pub threshold: f64,
    pub failure_samples: Vec<FailureSample>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub metadata: ResultMetadata,
    #[serde(skip)]
    max_samples: usize,
    #[serde(skip)]
    verdict: Option<bool>,
    #[serde(skip)]
    finalized: bool,
}

impl ValidationResult {
    pub fn new(
        rule_name: impl Into<String>,
        rule_type: impl Into<String>,
        columns: Vec<String>,
        threshold: f64,
        max_samples: usize,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            rule_type: rule_type.into(),
            columns,
            passed: true,
            total_rows: 0,
            failed_rows: 0,
            failure_percentage: 0.0,
            threshold,
            failure_samples: Vec::new(),
            error: None,
            error_kind: None,
            metadata: ResultMetadata::default(),
            max_samples,
            verdict: None,
            finalized: false,
        }
    }

    /// Fold one chunk worth of outcome.
    pub fn merge(&mut self, rows: u64, failed: u64, samples: Vec<FailureSample>) {
        if self.finalized {
            return;
        }
        self.total_rows += rows;
        self.failed_rows += failed;
        self.push_samples(samples);
    }

    /// Failures discovered at the end of the stream.
    pub fn add_failures(&mut self, failed: u64, samples: Vec<FailureSample>) {
        self.merge(0, failed, samples);
    }

    fn push_samples(&mut self, samples: Vec<FailureSample>) {
        let room = self.max_samples.saturating_sub(self.failure_samples.len());
        self.failure_samples.extend(samples.into_iter().take(room));
    }

    /// Room left in the failure sample list.
    pub fn sample_room(&self) -> usize {
        self.max_samples.saturating_sub(self.failure_samples.len())
    }

    /// Record a non-fatal error. The result will fail.
    pub fn record_error(&mut self, error: &CoreError) {
        if self.finalized {
            return;
        }
        if let CoreError::ColumnNotFound { available, .. } = error {
            self.metadata.available_columns = Some(available.clone());
        }
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
    }

    /// Decide pass or fail explicitly instead of comparing with the threshold.
    pub fn set_verdict(&mut self, passed: bool) {
        if !self.finalized {
            self.verdict = Some(passed);
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Compute the percentage and the verdict. Later calls change nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.failure_percentage = if self.total_rows > 0 {
            (self.failed_rows as f64 / self.total_rows as f64) * 100.
        } else {
            0.0
        };
        self.passed = self.error.is_none()
            && self
                .verdict
                .unwrap_or(self.failure_percentage <= self.threshold);
        self.finalized = true;
    }
}

/// Everything a run produced, in rule declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub results: Vec<ValidationResult>,
    pub profiles: Vec<ColumnProfile>,
    pub rows_processed: u64,
    pub chunks_processed: u64,
    /// The engine stopped pulling chunks before the end of the stream.
    pub stopped_early: bool,
    /// Loader failure that ended the stream, if any.
    pub source_error: Option<String>,
}

impl RunOutcome {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn result(&self, rule_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.rule_name == rule_name)
    }

    pub fn profile(&self, column: &str) -> Option<&ColumnProfile> {
        self.profiles.iter().find(|p| p.column == column)
    }
}
