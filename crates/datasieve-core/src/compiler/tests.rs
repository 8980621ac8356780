use std::io::Write;

use crate::{
    compiler::{compile_rule, compile_rules, validate_spec},
    config::{EarlyStopConfig, EngineConfig},
    context::RunContext,
    errors::{CoreError, ErrorKind},
    matching::MatchMode,
    rules::{ReferenceSource, RuleSpec},
    tracking::SpillTarget,
};

fn ctx() -> RunContext {
    RunContext::new("compiler", EngineConfig::default())
        .unwrap()
        .with_spill_target(SpillTarget::Memory)
}

fn not_null(columns: &[&str]) -> RuleSpec {
    RuleSpec::NotNull {
        name: None,
        columns: columns.iter().map(|c| c.to_string()).collect(),
        threshold: 0.0,
        early_stop: None,
    }
}

fn reference(path: std::path::PathBuf, mode: MatchMode) -> RuleSpec {
    RuleSpec::Reference {
        name: Some("customer_fk".to_string()),
        columns: vec!["customer_id".to_string()],
        reference: ReferenceSource {
            path,
            columns: Some(vec!["id".to_string()]),
        },
        mode,
        allow_nulls: false,
    }
}

#[test]
fn test_compile_not_null() {
    let rule = compile_rule(&not_null(&["id", "email"]), &ctx()).unwrap();
    assert_eq!(rule.name(), "NotNull:id+email");
    assert_eq!(rule.rule_type(), "NotNull");
    assert_eq!(rule.columns().len(), 2);
    assert!(rule.early_stop().is_none());
}

#[test]
fn test_empty_columns_is_config_error() {
    let err = compile_rule(&not_null(&[]), &ctx()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_threshold_out_of_range() {
    let spec = RuleSpec::Unique {
        name: None,
        columns: vec!["id".to_string()],
        threshold: 150.0,
        max_duplicates: None,
        early_stop: None,
    };
    assert!(validate_spec(&spec).unwrap_err().is_fatal());
}

#[test]
fn test_range_needs_a_bound() {
    let spec = RuleSpec::Range {
        name: None,
        column: "price".to_string(),
        min: None,
        max: None,
        threshold: 0.0,
        early_stop: None,
    };
    assert!(validate_spec(&spec).is_err());

    let spec = RuleSpec::Range {
        name: None,
        column: "price".to_string(),
        min: Some(10.0),
        max: Some(1.0),
        threshold: 0.0,
        early_stop: None,
    };
    assert!(compile_rule(&spec, &ctx()).err().unwrap().is_fatal());
}

#[test]
fn test_invalid_early_stop_rates() {
    let spec = RuleSpec::NotNull {
        name: None,
        columns: vec!["id".to_string()],
        threshold: 0.0,
        early_stop: Some(EarlyStopConfig {
            unacceptable_rate: Some(0.001),
            ..EarlyStopConfig::new(0.01)
        }),
    };
    assert!(matches!(validate_spec(&spec), Err(CoreError::Config(_))));
}

#[test]
fn test_duplicate_names_rejected() {
    let specs = vec![not_null(&["id"]), not_null(&["id"])];
    let err = compile_rules(&specs, &ctx()).err().unwrap();
    assert!(err.to_string().contains("duplicate rule name"));
}

#[test]
fn test_reference_rule_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("customers.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "id,name\n1,ann\n2,bob\n3,cyd").unwrap();

    let rule = compile_rule(&reference(path, MatchMode::Subset), &ctx()).unwrap();
    assert_eq!(rule.name(), "customer_fk");
    assert_eq!(rule.rule_type(), "Reference");
    assert_eq!(rule.columns(), &["customer_id".to_string()]);
}

#[test]
fn test_missing_reference_file_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let specs = vec![
        not_null(&["customer_id"]),
        reference(dir.path().join("missing.csv"), MatchMode::ExactMatch),
    ];
    let compiled = compile_rules(&specs, &ctx()).unwrap();
    assert_eq!(compiled.len(), 2);
    assert!(compiled[0].rule.is_ok());
    let failed = &compiled[1];
    assert_eq!(failed.name, "customer_fk");
    assert_eq!(failed.rule_type, "Reference");
    assert!(matches!(failed.rule, Err(CoreError::IoError(_))));
}

#[test]
fn test_reference_column_missing_from_reference_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("customers.csv");
    std::fs::write(&path, "key,name\n1,ann\n").unwrap();
    let compiled = compile_rules(&[reference(path, MatchMode::Subset)], &ctx()).unwrap();
    let err = compiled[0].rule.as_ref().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Schema);
}

#[test]
fn test_invalid_overlap_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let spec = reference(dir.path().join("x.csv"), MatchMode::Overlap { min_pct: 120.0 });
    assert!(compile_rules(&[spec], &ctx()).err().unwrap().is_fatal());
}
