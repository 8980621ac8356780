//! Streaming data-quality core.
//!
//! Rules and column profiles run over a stream of Arrow chunks with bounded
//! memory: duplicate detection spills keys to SQLite, statistical checks run
//! on reservoir samples and report Wald intervals, and sequential tests can
//! stop a rule before the stream ends.
pub mod chunk;
pub mod compiler;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod matching;
pub mod readers;
pub mod results;
pub mod rules;
pub mod sampling;
pub mod source;
pub mod stats;
pub mod tracking;
pub mod utils;

pub use chunk::{ArrowColumn, Chunk, ColumnAccessor};
pub use config::{EarlyStopConfig, EngineConfig, EngineConfigBuilder, SamplingConfig};
pub use context::RunContext;
pub use engine::{ExecutionEngine, Job};
pub use errors::{CoreError, ErrorKind};
pub use matching::{KeyMatcher, MatchMode, MatchReport, ReferenceIndex};
pub use results::{FailureSample, RunOutcome, ValidationResult};
pub use rules::{RuleSpec, StreamingRule};
pub use source::{BatchSource, ChunkSource};
pub use tracking::{KeyTracker, KeyTrackerConfig, SpillTarget};
