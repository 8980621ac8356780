//! Typed engine configuration, validated once before a run starts.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{errors::CoreError, sampling::SequentialTest, tracking::SpillTarget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub sample_size: usize,
    pub confidence_level: f64,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_size: 385_000,
            confidence_level: 0.95,
            seed: 42,
        }
    }
}

/// Parameters of the sequential test attached to a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EarlyStopConfig {
    /// Failure rate considered acceptable (p0)
    pub acceptable_rate: f64,
    /// Failure rate considered unacceptable (p1). Defaults to 10 x p0.
    #[serde(default)]
    pub unacceptable_rate: Option<f64>,
    #[serde(default = "default_error_rate")]
    pub alpha: f64,
    #[serde(default = "default_error_rate")]
    pub beta: f64,
    #[serde(default)]
    pub min_rows: u64,
}

fn default_error_rate() -> f64 {
    0.05
}

impl EarlyStopConfig {
    pub fn new(acceptable_rate: f64) -> Self {
        Self {
            acceptable_rate,
            unacceptable_rate: None,
            alpha: default_error_rate(),
            beta: default_error_rate(),
            min_rows: 0,
        }
    }

    pub fn unacceptable_rate(&self) -> f64 {
        self.unacceptable_rate
            .unwrap_or((self.acceptable_rate * 10.0).min(0.999))
    }

    /// Fails with a configuration error on inconsistent rates.
    pub fn build_test(&self) -> Result<SequentialTest, CoreError> {
        Ok(SequentialTest::new(
            self.acceptable_rate,
            self.unacceptable_rate(),
            self.alpha,
            self.beta,
        )?
        .with_min_rows(self.min_rows))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub max_memory_keys: usize,
    pub bloom_false_positive_rate: f64,
    pub max_sample_failures: usize,
    pub sampling: SamplingConfig,
    /// Defaults to the system temp dir.
    pub spill_dir: Option<PathBuf>,
    pub keep_spill_files: bool,
    pub stats_columns: Vec<String>,
    /// Profile quantiles come from a reservoir sample instead of the digest.
    pub sample_profiles: bool,
    pub top_k: usize,
    pub max_tracked_categories: usize,
    pub histogram_bins: usize,
    /// Memory a file run may use. When set, the chunk size of sources
    /// opened from paths is tuned to it instead of using `chunk_size`.
    pub memory_budget_bytes: Option<u64>,
    /// Categorical column whose values split profile samples into strata.
    pub stratify_by: Option<String>,
    /// Sampled values kept per stratum.
    pub stratum_sample_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50_000,
            max_memory_keys: 1_000_000,
            bloom_false_positive_rate: 0.01,
            max_sample_failures: 100,
            sampling: SamplingConfig::default(),
            spill_dir: None,
            keep_spill_files: false,
            stats_columns: Vec::new(),
            sample_profiles: false,
            top_k: 10,
            max_tracked_categories: 10_000,
            histogram_bins: 20,
            memory_budget_bytes: None,
            stratify_by: None,
            stratum_sample_size: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.chunk_size == 0 {
            return Err(CoreError::config("chunk_size must be greater than 0"));
        }
        if self.max_memory_keys == 0 {
            return Err(CoreError::config("max_memory_keys must be greater than 0"));
        }
        let p = self.bloom_false_positive_rate;
        if !(p > 0.0 && p < 1.0) {
            return Err(CoreError::config(format!(
                "bloom_false_positive_rate must be in (0, 1), got {p}"
            )));
        }
        if self.sampling.sample_size == 0 {
            return Err(CoreError::config("sample_size must be greater than 0"));
        }
        let level = self.sampling.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(CoreError::config(format!(
                "confidence_level must be in (0, 1), got {level}"
            )));
        }
        if self.top_k == 0 {
            return Err(CoreError::config("top_k must be greater than 0"));
        }
        if self.stats_columns.iter().any(|c| c.is_empty()) {
            return Err(CoreError::config("stats_columns contains an empty name"));
        }
        if self.memory_budget_bytes == Some(0) {
            return Err(CoreError::config("memory_budget_bytes must be greater than 0"));
        }
        if let Some(column) = &self.stratify_by {
            if column.is_empty() {
                return Err(CoreError::config("stratify_by must name a column"));
            }
            if self.stratum_sample_size == 0 {
                return Err(CoreError::config("stratum_sample_size must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Where trackers spill: a SQLite file per tracker under `spill_dir`.
    pub fn spill_target(&self) -> SpillTarget {
        SpillTarget::Sqlite {
            dir: self.spill_dir.clone().unwrap_or_else(std::env::temp_dir),
            keep_files: self.keep_spill_files,
        }
    }
}

pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    /// Create a new [`EngineConfigBuilder`]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<EngineConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn with_max_memory_keys(mut self, max_memory_keys: usize) -> Self {
        self.config.max_memory_keys = max_memory_keys;
        self
    }

    pub fn with_bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.config.bloom_false_positive_rate = rate;
        self
    }

    pub fn with_max_sample_failures(mut self, max: usize) -> Self {
        self.config.max_sample_failures = max;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.config.sampling.sample_size = sample_size;
        self
    }

    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.config.sampling.confidence_level = level;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.sampling.seed = seed;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.spill_dir = Some(dir.into());
        self
    }

    pub fn with_keep_spill_files(mut self, keep: bool) -> Self {
        self.config.keep_spill_files = keep;
        self
    }

    pub fn with_stats_columns(mut self, columns: Vec<String>) -> Self {
        self.config.stats_columns = columns;
        self
    }

    pub fn with_sample_profiles(mut self, sample: bool) -> Self {
        self.config.sample_profiles = sample;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    pub fn with_max_tracked_categories(mut self, max: usize) -> Self {
        self.config.max_tracked_categories = max;
        self
    }

    pub fn with_histogram_bins(mut self, bins: usize) -> Self {
        self.config.histogram_bins = bins;
        self
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.config.memory_budget_bytes = Some(bytes);
        self
    }

    pub fn with_stratify_by(mut self, column: impl Into<String>) -> Self {
        self.config.stratify_by = Some(column.into());
        self
    }

    pub fn with_stratum_sample_size(mut self, size: usize) -> Self {
        self.config.stratum_sample_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 50_000);
        assert_eq!(config.max_memory_keys, 1_000_000);
        assert_eq!(config.bloom_false_positive_rate, 0.01);
        assert_eq!(config.max_sample_failures, 100);
        assert_eq!(config.sampling.sample_size, 385_000);
        assert_eq!(config.sampling.confidence_level, 0.95);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .with_chunk_size(1_000)
            .with_max_memory_keys(10)
            .with_seed(7)
            .with_stats_columns(vec!["price".to_string()])
            .build()
            .unwrap();
        assert_eq!(config.chunk_size, 1_000);
        assert_eq!(config.max_memory_keys, 10);
        assert_eq!(config.sampling.seed, 7);
        assert_eq!(config.stats_columns, vec!["price"]);
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        for builder in [
            EngineConfig::builder().with_chunk_size(0),
            EngineConfig::builder().with_bloom_false_positive_rate(1.5),
            EngineConfig::builder().with_confidence_level(1.0),
            EngineConfig::builder().with_sample_size(0),
            EngineConfig::builder().with_memory_budget(0),
            EngineConfig::builder().with_stratify_by(""),
            EngineConfig::builder()
                .with_stratify_by("region")
                .with_stratum_sample_size(0),
        ] {
            let err = builder.build().unwrap_err();
            assert!(err.is_fatal(), "{err}");
        }
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let ok: EngineConfig =
            serde_json::from_str(r#"{"chunk_size": 10, "sampling": {"seed": 3}}"#).unwrap();
        assert_eq!(ok.chunk_size, 10);
        assert_eq!(ok.sampling.seed, 3);
        assert_eq!(ok.sampling.sample_size, 385_000);

        let bad = serde_json::from_str::<EngineConfig>(r#"{"chunk_sise": 10}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_early_stop_defaults() {
        let early: EarlyStopConfig =
            serde_json::from_str(r#"{"acceptable_rate": 0.01}"#).unwrap();
        assert!((early.unacceptable_rate() - 0.1).abs() < 1e-12);
        assert_eq!(early.alpha, 0.05);
        assert_eq!(early.beta, 0.05);
        assert!(early.build_test().is_ok());

        let inverted = EarlyStopConfig {
            unacceptable_rate: Some(0.001),
            ..EarlyStopConfig::new(0.01)
        };
        assert!(inverted.build_test().unwrap_err().is_fatal());
    }
}
