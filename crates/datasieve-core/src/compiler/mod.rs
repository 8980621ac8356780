//! Rule compilation.
//!
//! Turns declarative `RuleSpec`s into executable `StreamingRule` trait
//! objects. Invalid parameters are configuration errors and abort the run.
//! A rule whose setup fails for any other reason (a missing reference file,
//! a reference column that does not exist) compiles into a failed slot so
//! the rest of the run can go on.

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{
    context::RunContext,
    errors::CoreError,
    matching::ReferenceIndex,
    readers::open_source_for,
    rules::{
        NotNullRule, OutlierRule, RangeRule, ReferenceRule, RuleSpec, StreamingRule, UniqueRule,
    },
    tracking::KeyTracker,
};

/// A rule ready to run, or the reason it could not be set up.
pub struct CompiledRule {
    pub name: String,
    pub rule_type: &'static str,
    pub columns: Vec<String>,
    pub threshold: f64,
    pub rule: Result<Box<dyn StreamingRule>, CoreError>,
}

impl CompiledRule {
    pub fn ready(rule: Box<dyn StreamingRule>) -> Self {
        Self {
            name: rule.name().to_string(),
            rule_type: rule.rule_type(),
            columns: rule.columns().to_vec(),
            threshold: rule.threshold(),
            rule: Ok(rule),
        }
    }

    fn failed(spec: &RuleSpec, error: CoreError) -> Self {
        Self {
            name: spec.name(),
            rule_type: spec.rule_type(),
            columns: spec.columns(),
            threshold: spec.threshold(),
            rule: Err(error),
        }
    }
}

fn check_columns(name: &str, columns: &[String]) -> Result<(), CoreError> {
    if columns.is_empty() {
        return Err(CoreError::config(format!(
            "rule '{name}' needs at least one column"
        )));
    }
    if columns.iter().any(|c| c.is_empty()) {
        return Err(CoreError::config(format!(
            "rule '{name}' has an empty column name"
        )));
    }
    Ok(())
}

fn check_threshold(name: &str, threshold: f64) -> Result<(), CoreError> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(CoreError::config(format!(
            "rule '{name}': threshold must be a percentage in [0, 100], got {threshold}"
        )));
    }
    Ok(())
}

/// Check everything that can be checked without touching data.
pub fn validate_spec(spec: &RuleSpec) -> Result<(), CoreError> {
    let name = spec.name();
    check_columns(&name, &spec.columns())?;
    check_threshold(&name, spec.threshold())?;
    match spec {
        RuleSpec::NotNull { early_stop, .. } | RuleSpec::Unique { early_stop, .. } => {
            if let Some(early_stop) = early_stop {
                early_stop.build_test()?;
            }
        }
        RuleSpec::Range {
            min,
            max,
            early_stop,
            ..
        } => {
            if min.is_none() && max.is_none() {
                return Err(CoreError::config(format!(
                    "range rule '{name}' needs min, max or both"
                )));
            }
            if let Some(early_stop) = early_stop {
                early_stop.build_test()?;
            }
        }
        RuleSpec::Outlier { z_threshold, .. } => {
            if !(*z_threshold > 0.0 && z_threshold.is_finite()) {
                return Err(CoreError::config(format!(
                    "outlier rule '{name}': z_threshold must be positive, got {z_threshold}"
                )));
            }
        }
        RuleSpec::Reference {
            columns,
            reference,
            mode,
            ..
        } => {
            mode.validate()?;
            if let Some(reference_columns) = &reference.columns {
                check_columns(&name, reference_columns)?;
                if reference_columns.len() != columns.len() {
                    return Err(CoreError::config(format!(
                        "reference rule '{name}': {} subject columns but {} reference columns",
                        columns.len(),
                        reference_columns.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Build one executable rule.
pub fn compile_rule(spec: &RuleSpec, ctx: &RunContext) -> Result<Box<dyn StreamingRule>, CoreError> {
    validate_spec(spec)?;
    let name = spec.name();
    let rule: Box<dyn StreamingRule> = match spec {
        RuleSpec::NotNull {
            columns,
            threshold,
            early_stop,
            ..
        } => Box::new(NotNullRule::new(
            name,
            columns.clone(),
            *threshold,
            early_stop.clone(),
        )),
        RuleSpec::Unique {
            columns,
            threshold,
            max_duplicates,
            early_stop,
            ..
        } => {
            let tracker = KeyTracker::new(
                ctx.namespace("unique", &name),
                &ctx.tracker_config(*max_duplicates),
                ctx.spill_target().clone(),
            );
            Box::new(UniqueRule::new(
                name,
                columns.clone(),
                *threshold,
                tracker,
                early_stop.clone(),
            ))
        }
        RuleSpec::Range {
            column,
            min,
            max,
            threshold,
            early_stop,
            ..
        } => Box::new(RangeRule::new(
            name,
            column.clone(),
            *min,
            *max,
            *threshold,
            early_stop.clone(),
        )?),
        RuleSpec::Outlier {
            column,
            z_threshold,
            threshold,
            ..
        } => {
            let seed = ctx.seed_for_label(&name);
            Box::new(OutlierRule::new(
                name,
                column.clone(),
                *z_threshold,
                *threshold,
                ctx.config().sampling.sample_size,
                seed,
            )?)
        }
        RuleSpec::Reference {
            columns,
            reference,
            mode,
            allow_nulls,
            ..
        } => {
            let reference_columns = reference.columns.as_ref().unwrap_or(columns);
            // Only the index is built while the reference is read
            let mut source = open_source_for(&reference.path, reference_columns, ctx.config(), 1)?;
            let index = ReferenceIndex::build(source.as_mut(), reference_columns, ctx, &name)?;
            Box::new(ReferenceRule::new(
                name,
                columns.clone(),
                *mode,
                *allow_nulls,
                index,
                ctx.config().max_sample_failures,
            )?)
        }
    };
    debug!(rule = rule.name(), rule_type = rule.rule_type(), "rule compiled");
    Ok(rule)
}

/// Compile every spec in declaration order.
///
/// Fails on the first configuration error or on duplicate rule names. Other
/// setup errors are kept in the returned slot.
pub fn compile_rules(specs: &[RuleSpec], ctx: &RunContext) -> Result<Vec<CompiledRule>, CoreError> {
    let mut names = HashSet::new();
    for spec in specs {
        validate_spec(spec)?;
        let name = spec.name();
        if !names.insert(name.clone()) {
            return Err(CoreError::config(format!("duplicate rule name '{name}'")));
        }
    }

    let mut compiled = Vec::with_capacity(specs.len());
    for spec in specs {
        match compile_rule(spec, ctx) {
            Ok(rule) => compiled.push(CompiledRule::ready(rule)),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(rule = %spec.name(), error = %e, "rule setup failed");
                compiled.push(CompiledRule::failed(spec, e));
            }
        }
    }
    Ok(compiled)
}
