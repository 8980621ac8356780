//! Result accumulation during a run.
//!
//! `ResultAccumulator` owns one slot per rule: the executable rule, its
//! running `ValidationResult` and, when the rule asked for it, the sequential
//! test that may stop it before the end of the stream.
use tracing::{info, warn};

use crate::{
    chunk::Chunk,
    compiler::CompiledRule,
    context::RunContext,
    errors::CoreError,
    results::{EarlyStopInfo, ValidationResult},
    rules::StreamingRule,
    sampling::{Decision, SequentialTest},
};

struct RuleSlot {
    rule: Option<Box<dyn StreamingRule>>,
    result: ValidationResult,
    sprt: Option<SequentialTest>,
    active: bool,
}

fn record_failure(result: &mut ValidationResult, error: &CoreError) {
    warn!(
        rule = %result.rule_name,
        error = %error,
        "rule failed, converted into a failed result"
    );
    result.record_error(error);
}

pub struct ResultAccumulator {
    slots: Vec<RuleSlot>,
}

impl ResultAccumulator {
    pub fn new(rules: Vec<CompiledRule>, max_samples: usize) -> Result<Self, CoreError> {
        let mut slots = Vec::with_capacity(rules.len());
        for compiled in rules {
            let mut result = ValidationResult::new(
                compiled.name,
                compiled.rule_type,
                compiled.columns,
                compiled.threshold,
                max_samples,
            );
            let slot = match compiled.rule {
                Ok(rule) => {
                    let sprt = rule.early_stop().map(|c| c.build_test()).transpose()?;
                    RuleSlot {
                        rule: Some(rule),
                        result,
                        sprt,
                        active: true,
                    }
                }
                Err(e) => {
                    result.record_error(&e);
                    RuleSlot {
                        rule: None,
                        result,
                        sprt: None,
                        active: false,
                    }
                }
            };
            slots.push(slot);
        }
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Route one chunk through every active rule.
    ///
    /// Non-fatal errors fail the rule that raised them; the other rules keep
    /// going. A configuration error aborts the run.
    pub fn process_chunk(&mut self, chunk: &Chunk, ctx: &RunContext) -> Result<(), CoreError> {
        for slot in self.slots.iter_mut().filter(|s| s.active) {
            let Some(rule) = slot.rule.as_mut() else {
                continue;
            };
            let outcome = match rule.process(chunk, slot.result.sample_room(), ctx) {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    record_failure(&mut slot.result, &e);
                    slot.active = false;
                    continue;
                }
            };
            let (rows, failed) = (outcome.rows, outcome.failed);
            slot.result.merge(rows, failed, outcome.samples);

            if let Some(sprt) = slot.sprt.as_mut() {
                let decision = sprt.update(failed, rows);
                if decision != Decision::Continue {
                    info!(
                        rule = %slot.result.rule_name,
                        ?decision,
                        rows = sprt.rows(),
                        failures = sprt.failures(),
                        "sequential test decided, rule stopped early"
                    );
                    slot.result.metadata.stopped_early = true;
                    slot.active = false;
                }
            }
            if slot.active && rule.should_stop() {
                info!(rule = %slot.result.rule_name, "rule has nothing left to check");
                slot.result.metadata.stopped_early = true;
                slot.active = false;
            }
        }
        Ok(())
    }

    /// Fail every rule still running, e.g. after a loader error.
    pub fn fail_active(&mut self, error: &CoreError) {
        for slot in self.slots.iter_mut().filter(|s| s.active) {
            record_failure(&mut slot.result, error);
            slot.active = false;
        }
    }

    /// No rule needs further chunks.
    pub fn all_stopped(&self) -> bool {
        self.slots.iter().all(|s| !s.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Closing pass, then freeze every result.
    pub fn finalize(self, ctx: &RunContext) -> Vec<ValidationResult> {
        let mut results = Vec::with_capacity(self.slots.len());
        for mut slot in self.slots {
            if let Some(rule) = slot.rule.as_mut() {
                if slot.result.error.is_none() {
                    if let Err(e) = rule.finalize(&mut slot.result, ctx) {
                        record_failure(&mut slot.result, &e);
                    }
                }
            }
            if let Some(sprt) = &slot.sprt {
                let (accept_bound, reject_bound) = sprt.bounds();
                let decision = sprt.decision();
                match decision {
                    Decision::Accept => slot.result.set_verdict(true),
                    Decision::Reject => slot.result.set_verdict(false),
                    Decision::Continue => {}
                }
                slot.result.metadata.early_stop = Some(EarlyStopInfo {
                    decision,
                    rows_evaluated: sprt.rows(),
                    failures_observed: sprt.failures(),
                    log_likelihood_ratio: sprt.log_likelihood_ratio(),
                    accept_bound,
                    reject_bound,
                });
            }
            slot.result.finalize();
            results.push(slot.result);
        }
        results
    }
}
