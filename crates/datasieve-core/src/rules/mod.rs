pub mod generic;
pub mod numeric;
pub mod relations;
pub mod statistical;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use generic::{NotNullRule, UniqueRule};
pub use numeric::RangeRule;
pub use relations::ReferenceRule;
pub use statistical::OutlierRule;

use crate::{
    chunk::Chunk,
    config::EarlyStopConfig,
    context::RunContext,
    errors::CoreError,
    matching::MatchMode,
    results::{FailureSample, ValidationResult},
};

/// What one chunk contributed to a rule's result.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PartialOutcome {
    pub rows: u64,
    pub failed: u64,
    pub samples: Vec<FailureSample>,
}

/// A rule evaluated chunk by chunk over a single stream.
pub trait StreamingRule: Send {
    /// Returns the name of the rule instance.
    fn name(&self) -> &str;

    /// Returns the kind of the rule, e.g. `"Unique"`.
    fn rule_type(&self) -> &'static str;

    fn columns(&self) -> &[String];

    /// Allowed failure percentage.
    fn threshold(&self) -> f64;

    /// Evaluates one chunk. `sample_room` is how many failure samples the
    /// result can still take.
    fn process(
        &mut self,
        chunk: &Chunk,
        sample_room: usize,
        ctx: &RunContext,
    ) -> Result<PartialOutcome, CoreError>;

    /// Closing pass after the last chunk.
    fn finalize(
        &mut self,
        _result: &mut ValidationResult,
        _ctx: &RunContext,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// The rule has nothing left to learn from further chunks.
    fn should_stop(&self) -> bool {
        false
    }

    fn early_stop(&self) -> Option<&EarlyStopConfig> {
        None
    }
}

fn default_z_threshold() -> f64 {
    3.0
}

/// Where a reference key set is read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceSource {
    pub path: PathBuf,
    /// Key columns in the reference file. Defaults to the subject columns.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

/// Declarative rule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum RuleSpec {
    NotNull {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        #[serde(default)]
        threshold: f64,
        #[serde(default)]
        early_stop: Option<EarlyStopConfig>,
    },
    Unique {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        #[serde(default)]
        threshold: f64,
        /// Stop tracking once this many duplicates were found.
        #[serde(default)]
        max_duplicates: Option<u64>,
        #[serde(default)]
        early_stop: Option<EarlyStopConfig>,
    },
    Range {
        #[serde(default)]
        name: Option<String>,
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        threshold: f64,
        #[serde(default)]
        early_stop: Option<EarlyStopConfig>,
    },
    Outlier {
        #[serde(default)]
        name: Option<String>,
        column: String,
        #[serde(default = "default_z_threshold")]
        z_threshold: f64,
        #[serde(default)]
        threshold: f64,
    },
    Reference {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        reference: ReferenceSource,
        mode: MatchMode,
        #[serde(default)]
        allow_nulls: bool,
    },
}

impl RuleSpec {
    pub fn rule_type(&self) -> &'static str {
        match self {
            RuleSpec::NotNull { .. } => "NotNull",
            RuleSpec::Unique { .. } => "Unique",
            RuleSpec::Range { .. } => "Range",
            RuleSpec::Outlier { .. } => "Outlier",
            RuleSpec::Reference { .. } => "Reference",
        }
    }

    pub fn columns(&self) -> Vec<String> {
        match self {
            RuleSpec::NotNull { columns, .. }
            | RuleSpec::Unique { columns, .. }
            | RuleSpec::Reference { columns, .. } => columns.clone(),
            RuleSpec::Range { column, .. } | RuleSpec::Outlier { column, .. } => {
                vec![column.clone()]
            }
        }
    }

    /// Explicit name, or `<type>:<columns>`.
    pub fn name(&self) -> String {
        let explicit = match self {
            RuleSpec::NotNull { name, .. }
            | RuleSpec::Unique { name, .. }
            | RuleSpec::Range { name, .. }
            | RuleSpec::Outlier { name, .. }
            | RuleSpec::Reference { name, .. } => name,
        };
        explicit
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.rule_type(), self.columns().join("+")))
    }

    pub fn threshold(&self) -> f64 {
        match self {
            RuleSpec::NotNull { threshold, .. }
            | RuleSpec::Unique { threshold, .. }
            | RuleSpec::Range { threshold, .. }
            | RuleSpec::Outlier { threshold, .. } => *threshold,
            RuleSpec::Reference { .. } => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_spec_from_json() {
        let spec: RuleSpec = serde_json::from_str(
            r#"{"type": "Unique", "columns": ["id", "region"], "max_duplicates": 10}"#,
        )
        .unwrap();
        assert_eq!(spec.rule_type(), "Unique");
        assert_eq!(spec.name(), "Unique:id+region");
        assert_eq!(spec.threshold(), 0.0);
    }

    #[test]
    fn test_rule_spec_rejects_unknown_fields() {
        let err = serde_json::from_str::<RuleSpec>(
            r#"{"type": "Range", "column": "price", "minimum": 0}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_rule_spec_rejects_unknown_match_mode() {
        let ok = serde_json::from_str::<RuleSpec>(
            r#"{"type": "Reference", "columns": ["id"], "reference": {"path": "ref.csv"}, "mode": {"overlap": {"min_pct": 60}}}"#,
        )
        .unwrap();
        assert!(matches!(
            ok,
            RuleSpec::Reference {
                mode: MatchMode::Overlap { .. },
                ..
            }
        ));

        let err = serde_json::from_str::<RuleSpec>(
            r#"{"type": "Reference", "columns": ["id"], "reference": {"path": "ref.csv"}, "mode": "fuzzy"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_early_stop_only_on_row_rules() {
        let early = r#""early_stop": {"acceptable_rate": 0.01}"#;
        let accepted = [
            format!(r#"{{"type": "NotNull", "columns": ["id"], {early}}}"#),
            format!(r#"{{"type": "Unique", "columns": ["id"], {early}}}"#),
            format!(r#"{{"type": "Range", "column": "amount", "min": 0, {early}}}"#),
        ];
        for json in &accepted {
            assert!(serde_json::from_str::<RuleSpec>(json).is_ok(), "{json}");
        }

        let rejected = [
            format!(r#"{{"type": "Outlier", "column": "amount", {early}}}"#),
            format!(
                r#"{{"type": "Reference", "columns": ["id"], "reference": {{"path": "ref.csv"}}, "mode": "subset", {early}}}"#
            ),
        ];
        for json in &rejected {
            let err = serde_json::from_str::<RuleSpec>(json).unwrap_err();
            assert!(err.to_string().contains("early_stop"), "{err}");
        }
    }

    #[test]
    fn test_outlier_defaults() {
        let spec: RuleSpec =
            serde_json::from_str(r#"{"type": "Outlier", "name": "amount_outliers", "column": "amount"}"#)
                .unwrap();
        assert_eq!(spec.name(), "amount_outliers");
        match spec {
            RuleSpec::Outlier { z_threshold, .. } => assert_eq!(z_threshold, 3.0),
            _ => panic!("expected Outlier"),
        }
    }
}
