use tracing::{info, warn};

use crate::{
    chunk::Chunk,
    context::RunContext,
    errors::CoreError,
    matching::{MatchMode, MatchState, ReferenceIndex},
    results::{FailureSample, ValidationResult},
    rules::{PartialOutcome, StreamingRule},
};

/// Subject keys checked against a reference key set built before the run.
///
/// Per-row failures depend on the mode: unmatched keys for `exact_match`,
/// `subset` and `overlap`, plus null keys for `exact_match` unless allowed.
/// `superset_of` fails on reference keys the subject never produced, which
/// is only known at the end. The pass verdict always comes from the match
/// mode, not from the failure percentage.
pub struct ReferenceRule {
    name: String,
    columns: Vec<String>,
    mode: MatchMode,
    allow_nulls: bool,
    reference: ReferenceIndex,
    state: MatchState,
}

impl ReferenceRule {
    pub fn new(
        name: String,
        columns: Vec<String>,
        mode: MatchMode,
        allow_nulls: bool,
        reference: ReferenceIndex,
        max_samples: usize,
    ) -> Result<Self, CoreError> {
        mode.validate()?;
        let state = MatchState::new(&reference, max_samples);
        Ok(Self {
            name,
            columns,
            mode,
            allow_nulls,
            reference,
            state,
        })
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }
}

impl StreamingRule for ReferenceRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> &'static str {
        "Reference"
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn threshold(&self) -> f64 {
        0.0
    }

    fn process(
        &mut self,
        chunk: &Chunk,
        sample_room: usize,
        _ctx: &RunContext,
    ) -> Result<PartialOutcome, CoreError> {
        let row_room = match self.mode {
            MatchMode::SupersetOf => 0,
            _ => sample_room,
        };
        let observed = self
            .state
            .observe(&self.reference, chunk, &self.columns, row_room)?;
        let failed = match self.mode {
            MatchMode::ExactMatch if !self.allow_nulls => observed.unmatched + observed.null_rows,
            MatchMode::ExactMatch | MatchMode::Subset | MatchMode::Overlap { .. } => {
                observed.unmatched
            }
            MatchMode::SupersetOf => 0,
        };
        Ok(PartialOutcome {
            rows: observed.rows,
            failed,
            samples: observed.samples,
        })
    }

    fn finalize(
        &mut self,
        result: &mut ValidationResult,
        _ctx: &RunContext,
    ) -> Result<(), CoreError> {
        let report = self
            .state
            .report(&self.reference, self.mode, self.allow_nulls)?;
        info!(
            rule = %self.name,
            mode = %self.mode,
            matched = report.matched,
            unmatched = report.unmatched,
            missing = report.missing_reference_keys,
            passed = report.passed,
            "reference match complete"
        );
        if self.mode == MatchMode::SupersetOf {
            let samples = report
                .missing_reference_samples
                .iter()
                .map(|key| {
                    FailureSample::detached(Some(key.clone()), "reference key missing from subject")
                })
                .collect();
            result.add_failures(report.missing_reference_keys, samples);
        }
        result.set_verdict(report.passed);
        result.metadata.tracker = Some(self.reference.tracker_stats());
        result.metadata.match_report = Some(report);
        self.reference.close()
    }
}

impl Drop for ReferenceRule {
    fn drop(&mut self) {
        if let Err(e) = self.reference.close() {
            warn!(rule = %self.name, error = %e, "failed to release reference index");
        }
    }
}
