//! Tests for the execution engine module.

use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::chunk::Chunk;
use crate::config::{EarlyStopConfig, EngineConfig};
use crate::context::RunContext;
use crate::errors::{CoreError, ErrorKind};
use crate::rules::{PartialOutcome, RuleSpec, StreamingRule};
use crate::sampling::Decision;
use crate::source::{BatchSource, ChunkSource};
use crate::tracking::SpillTarget;

use super::{ExecutionEngine, Job};

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a RecordBatch with a single string column.
fn create_string_batch(column_name: &str, values: Vec<Option<&str>>) -> RecordBatch {
    let array = StringArray::from(values);
    let schema = Schema::new(vec![Field::new(column_name, DataType::Utf8, true)]);
    RecordBatch::try_new(Arc::new(schema), vec![Arc::new(array)]).unwrap()
}

/// Create a RecordBatch with an integer `id` and a float `price` column.
fn create_orders_batch(ids: Vec<Option<i64>>, prices: Vec<Option<f64>>) -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("price", DataType::Float64, true),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(Float64Array::from(prices)),
        ],
    )
    .unwrap()
}

fn orders_source(rows: i64, chunk_size: usize) -> BatchSource {
    let ids = (0..rows).map(Some).collect();
    let prices = (0..rows).map(|i| Some((i % 100) as f64)).collect();
    BatchSource::from_batches(vec![create_orders_batch(ids, prices)], chunk_size).unwrap()
}

fn engine(config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(config)
        .unwrap()
        .with_spill_target(SpillTarget::Memory)
}

fn default_engine() -> ExecutionEngine {
    engine(EngineConfig::default())
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

fn not_null(column: &str, early_stop: Option<EarlyStopConfig>) -> RuleSpec {
    RuleSpec::NotNull {
        name: None,
        columns: columns(&[column]),
        threshold: 0.0,
        early_stop,
    }
}

fn range(column: &str, min: f64, max: f64) -> RuleSpec {
    RuleSpec::Range {
        name: None,
        column: column.to_string(),
        min: Some(min),
        max: Some(max),
        threshold: 0.0,
        early_stop: None,
    }
}

fn unique(column: &str, max_duplicates: Option<u64>) -> RuleSpec {
    RuleSpec::Unique {
        name: None,
        columns: columns(&[column]),
        threshold: 0.0,
        max_duplicates,
        early_stop: None,
    }
}

/// Yields the chunks of `inner`, then an I/O error.
struct FailingSource {
    inner: BatchSource,
    chunks_before_error: usize,
}

impl Iterator for FailingSource {
    type Item = Result<Chunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunks_before_error == 0 {
            return Some(Err(CoreError::IoError(std::io::Error::other(
                "disk went away",
            ))));
        }
        self.chunks_before_error -= 1;
        self.inner.next()
    }
}

impl ChunkSource for FailingSource {
    fn schema(&self) -> SchemaRef {
        self.inner.schema()
    }
}

/// Counts every row as failed.
struct AlwaysFail {
    columns: Vec<String>,
}

impl StreamingRule for AlwaysFail {
    fn name(&self) -> &str {
        "always_fail"
    }

    fn rule_type(&self) -> &'static str {
        "Custom"
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn threshold(&self) -> f64 {
        50.0
    }

    fn process(
        &mut self,
        chunk: &Chunk,
        _sample_room: usize,
        _ctx: &RunContext,
    ) -> Result<PartialOutcome, CoreError> {
        Ok(PartialOutcome {
            rows: chunk.num_rows() as u64,
            failed: chunk.num_rows() as u64,
            samples: vec![],
        })
    }
}

// ============================================================================
// ExecutionEngine Tests
// ============================================================================

#[test]
fn test_run_across_chunks() {
    let batch = create_orders_batch(
        vec![Some(1), None, Some(3), Some(4), None],
        vec![Some(10.0), Some(20.0), Some(-5.0), Some(30.0), Some(500.0)],
    );
    let mut source = BatchSource::from_batches(vec![batch], 2).unwrap();
    let rules = vec![not_null("id", None), range("price", 0.0, 100.0)];

    let outcome = default_engine().run("orders", &mut source, &rules).unwrap();
    assert_eq!(outcome.rows_processed, 5);
    assert_eq!(outcome.chunks_processed, 3);
    assert!(!outcome.stopped_early);

    let nulls = outcome.result("NotNull:id").unwrap();
    assert_eq!(nulls.total_rows, 5);
    assert_eq!(nulls.failed_rows, 2);
    assert_eq!(nulls.failure_percentage, 40.0);
    let rows: Vec<_> = nulls.failure_samples.iter().map(|s| s.row).collect();
    assert_eq!(rows, vec![Some(1), Some(4)]);
    assert!(!nulls.passed);

    let prices = outcome.result("Range:price").unwrap();
    assert_eq!(prices.failed_rows, 2);
    assert_eq!(prices.failure_samples[0].row, Some(2));
    assert!(!outcome.all_passed());
}

#[test]
fn test_results_keep_declaration_order() {
    let mut source = orders_source(10, 4);
    let rules = vec![range("price", 0.0, 1000.0), not_null("id", None), unique("id", None)];
    let outcome = default_engine().run("order", &mut source, &rules).unwrap();
    let names: Vec<_> = outcome.results.iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(names, vec!["Range:price", "NotNull:id", "Unique:id"]);
    assert!(outcome.all_passed());
}

#[test]
fn test_missing_column_fails_only_its_rule() {
    let mut source = orders_source(10, 4);
    let rules = vec![not_null("email", None), not_null("id", None)];
    let outcome = default_engine().run("schema", &mut source, &rules).unwrap();

    let missing = outcome.result("NotNull:email").unwrap();
    assert!(!missing.passed);
    assert_eq!(missing.error_kind, Some(ErrorKind::Schema));
    assert_eq!(
        missing.metadata.available_columns,
        Some(vec!["id".to_string(), "price".to_string()])
    );

    let present = outcome.result("NotNull:id").unwrap();
    assert!(present.passed);
    assert_eq!(present.total_rows, 10);
}

#[test]
fn test_config_error_aborts_before_reading() {
    let mut source = orders_source(10, 4);
    let rules = vec![RuleSpec::NotNull {
        name: None,
        columns: columns(&["id"]),
        threshold: -1.0,
        early_stop: None,
    }];
    let err = default_engine().run("bad", &mut source, &rules).unwrap_err();
    assert!(err.is_fatal());
    // Nothing was pulled from the source
    assert_eq!(source.next().unwrap().unwrap().offset(), 0);
}

#[test]
fn test_invalid_engine_config() {
    let config = EngineConfig {
        bloom_false_positive_rate: 1.5,
        ..EngineConfig::default()
    };
    assert!(ExecutionEngine::new(config).is_err());
}

#[test]
fn test_sprt_rejects_early() {
    // Half of the ids are null, far above 10 x 1%
    let ids = (0..100_000).map(|i| (i % 2 == 0).then_some(i)).collect();
    let prices = vec![Some(1.0); 100_000];
    let mut source =
        BatchSource::from_batches(vec![create_orders_batch(ids, prices)], 1_000).unwrap();
    let rules = vec![not_null("id", Some(EarlyStopConfig::new(0.01)))];

    let outcome = default_engine().run("sprt", &mut source, &rules).unwrap();
    assert!(outcome.stopped_early);
    assert!(outcome.rows_processed < 100_000);

    let result = &outcome.results[0];
    assert!(!result.passed);
    assert!(result.metadata.stopped_early);
    let early_stop = result.metadata.early_stop.as_ref().unwrap();
    assert_eq!(early_stop.decision, Decision::Reject);
    assert_eq!(early_stop.rows_evaluated, result.total_rows);
}

#[test]
fn test_sprt_accepts_clean_stream() {
    let mut source = orders_source(50_000, 1_000);
    let rules = vec![not_null("id", Some(EarlyStopConfig::new(0.01)))];
    let outcome = default_engine().run("clean", &mut source, &rules).unwrap();
    assert!(outcome.stopped_early);
    assert_eq!(outcome.rows_processed, 1_000);
    let result = &outcome.results[0];
    assert!(result.passed);
    assert_eq!(
        result.metadata.early_stop.as_ref().unwrap().decision,
        Decision::Accept
    );
}

#[test]
fn test_stats_columns_keep_the_stream_going() {
    let config = EngineConfig::builder()
        .with_stats_columns(vec!["price".to_string()])
        .build()
        .unwrap();
    let mut source = orders_source(50_000, 1_000);
    let rules = vec![not_null("id", Some(EarlyStopConfig::new(0.01)))];
    let outcome = engine(config).run("profiled", &mut source, &rules).unwrap();
    assert!(!outcome.stopped_early);
    assert_eq!(outcome.rows_processed, 50_000);
    // The rule still stopped on its own
    assert_eq!(outcome.results[0].total_rows, 1_000);

    let profile = outcome.profile("price").unwrap();
    let stats = profile.stats.as_ref().unwrap();
    assert_eq!(stats.count, 50_000);
    assert!((stats.mean - 49.5).abs() < 1e-9);
    assert_eq!(stats.min, Some(0.0));
    assert_eq!(stats.max, Some(99.0));
}

#[test]
fn test_missing_stats_column_reports_error() {
    let config = EngineConfig::builder()
        .with_stats_columns(vec!["discount".to_string()])
        .build()
        .unwrap();
    let mut source = orders_source(10, 4);
    let outcome = engine(config).run("profiled", &mut source, &[]).unwrap();
    let profile = outcome.profile("discount").unwrap();
    assert!(profile.error.as_ref().unwrap().contains("discount"));
    assert!(profile.stats.is_none());
}

#[test]
fn test_no_work_pulls_nothing() {
    let mut source = orders_source(10, 4);
    let outcome = default_engine().run("empty", &mut source, &[]).unwrap();
    assert_eq!(outcome.chunks_processed, 0);
    assert!(outcome.results.is_empty());
    assert!(outcome.all_passed());
}

#[test]
fn test_unique_stops_at_max_duplicates() {
    let batch = create_string_batch(
        "sku",
        vec![Some("a"), Some("a"), Some("b"), Some("b"), Some("c"), Some("c")],
    );
    let mut source = BatchSource::from_batches(vec![batch], 2).unwrap();
    let outcome = default_engine()
        .run("dups", &mut source, &[unique("sku", Some(1))])
        .unwrap();
    assert!(outcome.stopped_early);
    assert_eq!(outcome.chunks_processed, 1);
    let result = &outcome.results[0];
    assert_eq!(result.failed_rows, 1);
    assert!(result.metadata.stopped_early);
    assert!(result.metadata.tracker.as_ref().unwrap().stopped_early);
}

#[test]
fn test_unique_survives_spillover() {
    let config = EngineConfig::builder()
        .with_max_memory_keys(100)
        .build()
        .unwrap();
    let ids = (0..1_000).map(|i| Some(i % 700)).collect();
    let prices = vec![Some(1.0); 1_000];
    let mut source =
        BatchSource::from_batches(vec![create_orders_batch(ids, prices)], 128).unwrap();
    let outcome = engine(config)
        .run("spill", &mut source, &[unique("id", None)])
        .unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.failed_rows, 300);
    let tracker = result.metadata.tracker.as_ref().unwrap();
    assert!(tracker.spilled);
    assert_eq!(tracker.distinct_keys, 700);
}

#[test]
fn test_source_error_keeps_partial_results() {
    let source = orders_source(10, 4);
    let mut failing = FailingSource {
        inner: source,
        chunks_before_error: 1,
    };
    let rules = vec![not_null("id", None)];
    let outcome = default_engine().run("io", &mut failing, &rules).unwrap();
    assert_eq!(outcome.rows_processed, 4);
    assert!(outcome.source_error.as_ref().unwrap().contains("disk went away"));

    let result = &outcome.results[0];
    assert!(!result.passed);
    assert_eq!(result.total_rows, 4);
    assert_eq!(result.error_kind, Some(ErrorKind::Resource));
}

#[test]
fn test_run_compiled_custom_rule() {
    let mut source = orders_source(10, 3);
    let rule = Box::new(AlwaysFail {
        columns: columns(&["id"]),
    });
    let outcome = default_engine()
        .run_compiled("custom", &mut source, vec![rule])
        .unwrap();
    let result = outcome.result("always_fail").unwrap();
    assert_eq!(result.rule_type, "Custom");
    assert_eq!(result.failed_rows, 10);
    assert!(!result.passed);
}

#[test]
fn test_run_many_keeps_job_order() {
    let jobs = (0..4)
        .map(|i| {
            Job::new(
                format!("job_{i}"),
                Box::new(orders_source(100 * (i + 1), 32)),
                vec![unique("id", None), not_null("price", None)],
            )
        })
        .collect();
    let outcomes = default_engine().run_many(jobs).unwrap();
    assert_eq!(outcomes.len(), 4);
    for (i, outcome) in outcomes.into_iter().enumerate() {
        let outcome = outcome.unwrap();
        assert_eq!(outcome.run_id, format!("job_{i}"));
        assert_eq!(outcome.rows_processed, 100 * (i as u64 + 1));
        assert!(outcome.all_passed());
    }
}

#[test]
fn test_run_many_rejects_duplicate_names() {
    let jobs = vec![
        Job::new("same", Box::new(orders_source(10, 4)), vec![]),
        Job::new("same", Box::new(orders_source(10, 4)), vec![]),
    ];
    assert!(default_engine().run_many(jobs).unwrap_err().is_fatal());
}

#[test]
fn test_outcome_serializes() {
    let mut source = orders_source(10, 4);
    let outcome = default_engine()
        .run("json", &mut source, &[range("price", 0.0, 5.0)])
        .unwrap();
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["results"][0]["rule_type"], "Range");
    assert_eq!(json["results"][0]["failed_rows"], 4);
}

fn named_unique(name: &str, column: &str) -> RuleSpec {
    RuleSpec::Unique {
        name: Some(name.to_string()),
        columns: columns(&[column]),
        threshold: 0.0,
        max_duplicates: None,
        early_stop: None,
    }
}

#[test]
fn test_similar_rule_names_spill_separately() {
    let spill = tempfile::tempdir().unwrap();
    let config = EngineConfig::builder()
        .with_max_memory_keys(2)
        .with_spill_dir(spill.path())
        .build()
        .unwrap();
    let mut source = orders_source(20, 8);
    let rules = vec![named_unique("dup-id", "id"), named_unique("dup_id", "id")];
    let outcome = ExecutionEngine::new(config)
        .unwrap()
        .run("run", &mut source, &rules)
        .unwrap();

    for name in ["dup-id", "dup_id"] {
        let result = outcome.result(name).unwrap();
        assert!(result.passed, "{name}: {:?}", result.error);
        assert_eq!(result.failed_rows, 0);
        let tracker = result.metadata.tracker.as_ref().unwrap();
        assert!(tracker.spilled);
        assert_eq!(tracker.distinct_keys, 20);
    }
    assert_eq!(std::fs::read_dir(spill.path()).unwrap().count(), 0);
}

#[test]
fn test_rerun_with_kept_spill_files_starts_clean() {
    let spill = tempfile::tempdir().unwrap();
    let config = EngineConfig::builder()
        .with_max_memory_keys(2)
        .with_spill_dir(spill.path())
        .with_keep_spill_files(true)
        .build()
        .unwrap();
    let engine = ExecutionEngine::new(config).unwrap();

    for _ in 0..2 {
        let mut source = orders_source(20, 8);
        let outcome = engine.run("nightly", &mut source, &[unique("id", None)]).unwrap();
        let result = &outcome.results[0];
        assert!(result.passed);
        assert_eq!(result.failed_rows, 0);
        assert_eq!(result.metadata.tracker.as_ref().unwrap().distinct_keys, 20);
    }
    assert!(std::fs::read_dir(spill.path()).unwrap().count() >= 2);
}

/// `price` cycles 0..100 with one spike at row 4321; `region` is "small" on
/// every hundredth row and "large" otherwise.
fn regional_source(rows: i64, chunk_size: usize) -> BatchSource {
    let schema = Schema::new(vec![
        Field::new("price", DataType::Float64, true),
        Field::new("region", DataType::Utf8, true),
    ]);
    let prices: Float64Array = (0..rows)
        .map(|i| Some(if i == 4_321 { 10_000.0 } else { (i % 100) as f64 }))
        .collect();
    let regions: StringArray = (0..rows)
        .map(|i| Some(if i % 100 == 0 { "small" } else { "large" }))
        .collect();
    let batch =
        RecordBatch::try_new(Arc::new(schema), vec![Arc::new(prices), Arc::new(regions)]).unwrap();
    BatchSource::from_batches(vec![batch], chunk_size).unwrap()
}

#[test]
fn test_stratified_profile_keeps_small_region() {
    let config = EngineConfig::builder()
        .with_stats_columns(columns(&["price"]))
        .with_stratify_by("region")
        .with_stratum_sample_size(10)
        .build()
        .unwrap();
    let mut source = regional_source(5_000, 512);
    let outcome = engine(config).run("strata", &mut source, &[]).unwrap();

    let profile = outcome.profile("price").unwrap();
    assert_eq!(profile.strata.len(), 2);
    let small = profile.strata.iter().find(|s| s.category == "small").unwrap();
    assert_eq!(small.stats.count, 10);
    // every small row has price 0
    assert_eq!(small.stats.max, Some(0.0));

    let sampling = profile.strata_sampling.as_ref().unwrap();
    assert_eq!(sampling.seen, 5_000);
    assert_eq!(sampling.sampled, 20);
    assert_eq!(sampling.categories, 2);
}

#[test]
fn test_missing_stratum_column_fails_only_the_profile() {
    let config = EngineConfig::builder()
        .with_stats_columns(columns(&["price"]))
        .with_stratify_by("segment")
        .build()
        .unwrap();
    let mut source = orders_source(10, 4);
    let outcome = engine(config)
        .run("strata", &mut source, &[not_null("id", None)])
        .unwrap();
    assert!(outcome.results[0].passed);
    let profile = outcome.profile("price").unwrap();
    assert!(profile.error.as_ref().unwrap().contains("segment"));
}

#[test]
fn test_sampled_run_is_reproducible() {
    let config = EngineConfig::builder()
        .with_sample_size(100)
        .with_seed(9)
        .with_sample_profiles(true)
        .with_stats_columns(columns(&["price"]))
        .with_stratify_by("region")
        .with_stratum_sample_size(25)
        .build()
        .unwrap();
    let rules = vec![
        RuleSpec::Outlier {
            name: Some("price_outliers".to_string()),
            column: "price".to_string(),
            z_threshold: 2.0,
            threshold: 100.0,
        },
        range("price", 0.0, 99.0),
    ];

    let run = || {
        let mut source = regional_source(5_000, 700);
        let outcome = engine(config.clone())
            .run("reproducible", &mut source, &rules)
            .unwrap();
        serde_json::to_value(&outcome).unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);

    let outliers = &first["results"][0];
    assert_eq!(outliers["rule_name"], "price_outliers");
    assert_eq!(outliers["metadata"]["sampling"]["exhaustive"], false);
    assert_eq!(outliers["metadata"]["sampling"]["estimate"]["sample_size"], 100);
}
