//! One-pass column statistics.
pub mod digest;
pub mod frequency;
pub mod profile;
pub mod streaming;

pub use digest::TDigest;
pub use frequency::{FrequencyCounter, ValueCount};
pub use profile::{ColumnProfile, ColumnProfiler, StratumProfile};
pub use streaming::{
    Histogram, Quantile, QuantileSource, REPORTED_QUANTILES, StatsSummary, StreamingStats,
    exact_quantile,
};
