//! Cross-source key matching.
//!
//! The reference stream is drained once into a [`KeyTracker`], giving each
//! distinct reference key an ordinal. The subject stream is then checked
//! key by key. A bitmap over reference ordinals records which reference
//! keys the subject contained, which is what `SupersetOf` needs.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    chunk::Chunk,
    context::RunContext,
    errors::CoreError,
    results::FailureSample,
    source::ChunkSource,
    tracking::{KeyTracker, TrackerStats},
    utils::key::{display_key, encode_row},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every subject key is in the reference; null keys fail unless allowed
    ExactMatch,
    /// At least `min_pct` percent of non-null subject keys are in the reference
    Overlap { min_pct: f64 },
    /// Every non-null subject key is in the reference
    Subset,
    /// Every reference key appears in the subject
    SupersetOf,
}

impl MatchMode {
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            MatchMode::Overlap { min_pct } if !(0.0..=100.0).contains(min_pct) => Err(
                CoreError::config(format!("overlap min_pct must be in [0, 100], got {min_pct}")),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::ExactMatch => write!(f, "exact_match"),
            MatchMode::Overlap { min_pct } => write!(f, "overlap:{min_pct}"),
            MatchMode::Subset => write!(f, "subset"),
            MatchMode::SupersetOf => write!(f, "superset_of"),
        }
    }
}

/// Parses `exact_match`, `subset`, `superset_of` and `overlap:<pct>`.
impl FromStr for MatchMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_lowercase().as_str() {
            "exact_match" | "exact" => MatchMode::ExactMatch,
            "subset" => MatchMode::Subset,
            "superset_of" | "superset" => MatchMode::SupersetOf,
            other => match other.strip_prefix("overlap:") {
                Some(pct) => MatchMode::Overlap {
                    min_pct: pct.trim().parse().map_err(|_| {
                        CoreError::config(format!("invalid overlap percentage '{pct}'"))
                    })?,
                },
                None => return Err(CoreError::config(format!("unknown match mode '{s}'"))),
            },
        };
        mode.validate()?;
        Ok(mode)
    }
}

/// Distinct keys of a reference stream.
pub struct ReferenceIndex {
    tracker: KeyTracker,
    columns: Vec<String>,
    rows: u64,
    null_rows: u64,
}

impl ReferenceIndex {
    /// Drain `source` into a tracker. Rows with a null key part are skipped.
    pub fn build(
        source: &mut dyn ChunkSource,
        columns: &[String],
        ctx: &RunContext,
        label: &str,
    ) -> Result<Self, CoreError> {
        if columns.is_empty() {
            return Err(CoreError::config("reference key needs at least one column"));
        }
        let mut tracker = KeyTracker::new(
            ctx.namespace("reference", label),
            &ctx.tracker_config(None),
            ctx.spill_target().clone(),
        );
        let mut rows = 0u64;
        let mut null_rows = 0u64;
        let mut key = Vec::new();
        for chunk in source {
            let chunk = chunk?;
            let key_columns = chunk.columns(columns)?;
            for row in 0..chunk.num_rows() {
                if encode_row(&key_columns, row, &mut key) {
                    tracker.add(&key)?;
                } else {
                    null_rows += 1;
                }
            }
            rows += chunk.num_rows() as u64;
        }
        info!(
            label,
            rows,
            distinct_keys = tracker.count(),
            spilled = tracker.is_spilled(),
            "reference index built"
        );
        Ok(Self {
            tracker,
            columns: columns.to_vec(),
            rows,
            null_rows,
        })
    }

    pub fn lookup(&self, key: &[u8]) -> Result<Option<u64>, CoreError> {
        self.tracker.lookup(key)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, CoreError> {
        self.tracker.contains(key)
    }

    pub fn distinct_keys(&self) -> u64 {
        self.tracker.count() as u64
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn null_rows(&self) -> u64 {
        self.null_rows
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    fn keys_for_ordinals(&self, ordinals: &[u64]) -> Result<Vec<Vec<u8>>, CoreError> {
        self.tracker.keys_for_ordinals(ordinals)
    }

    pub fn close(&mut self) -> Result<(), CoreError> {
        self.tracker.close()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    pub mode: MatchMode,
    pub allow_nulls: bool,
    pub subject_rows: u64,
    pub null_rows: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub unmatched_samples: Vec<String>,
    pub reference_keys: u64,
    pub reference_keys_seen: u64,
    pub missing_reference_keys: u64,
    pub missing_reference_samples: Vec<String>,
    /// Matched share of non-null subject rows, in percent
    pub overlap_pct: f64,
    pub passed: bool,
}

/// Failures observed in one subject chunk.
#[derive(Debug, Default)]
pub struct ChunkMatch {
    pub rows: u64,
    pub null_rows: u64,
    pub unmatched: u64,
    pub samples: Vec<FailureSample>,
}

/// Running state of one subject stream against a reference.
pub struct MatchState {
    seen: Vec<u64>,
    rows: u64,
    null_rows: u64,
    matched: u64,
    unmatched: u64,
    unmatched_samples: Vec<String>,
    max_samples: usize,
    key: Vec<u8>,
}

impl MatchState {
    pub fn new(reference: &ReferenceIndex, max_samples: usize) -> Self {
        let words = reference.distinct_keys().div_ceil(64) as usize;
        Self {
            seen: vec![0; words],
            rows: 0,
            null_rows: 0,
            matched: 0,
            unmatched: 0,
            unmatched_samples: Vec::new(),
            max_samples,
            key: Vec::new(),
        }
    }

    /// Check every row of `chunk`. `sample_room` bounds the failure samples
    /// returned for this chunk.
    pub fn observe(
        &mut self,
        reference: &ReferenceIndex,
        chunk: &Chunk,
        columns: &[String],
        sample_room: usize,
    ) -> Result<ChunkMatch, CoreError> {
        let key_columns = chunk.columns(columns)?;
        let mut outcome = ChunkMatch {
            rows: chunk.num_rows() as u64,
            ..ChunkMatch::default()
        };
        for row in 0..chunk.num_rows() {
            if !encode_row(&key_columns, row, &mut self.key) {
                outcome.null_rows += 1;
                continue;
            }
            match reference.lookup(&self.key)? {
                Some(ordinal) => {
                    self.seen[(ordinal / 64) as usize] |= 1 << (ordinal % 64);
                    self.matched += 1;
                }
                None => {
                    outcome.unmatched += 1;
                    let shown = display_key(&self.key);
                    if outcome.samples.len() < sample_room {
                        outcome.samples.push(FailureSample::new(
                            chunk.offset() + row as u64,
                            Some(shown.clone()),
                            "key not found in reference",
                        ));
                    }
                    if self.unmatched_samples.len() < self.max_samples {
                        self.unmatched_samples.push(shown);
                    }
                }
            }
        }
        self.rows += outcome.rows;
        self.null_rows += outcome.null_rows;
        self.unmatched += outcome.unmatched;
        debug!(
            rows = outcome.rows,
            unmatched = outcome.unmatched,
            "subject chunk matched"
        );
        Ok(outcome)
    }

    fn seen_count(&self) -> u64 {
        self.seen.iter().map(|w| w.count_ones() as u64).sum()
    }

    fn missing_ordinals(&self, total: u64, limit: usize) -> Vec<u64> {
        (0..total)
            .filter(|&ordinal| self.seen[(ordinal / 64) as usize] & (1 << (ordinal % 64)) == 0)
            .take(limit)
            .collect()
    }

    pub fn report(
        &self,
        reference: &ReferenceIndex,
        mode: MatchMode,
        allow_nulls: bool,
    ) -> Result<MatchReport, CoreError> {
        let reference_keys = reference.distinct_keys();
        let reference_keys_seen = self.seen_count();
        let missing_reference_keys = reference_keys - reference_keys_seen;
        let missing_reference_samples = if missing_reference_keys > 0 {
            let ordinals = self.missing_ordinals(reference_keys, self.max_samples);
            let mut keys: Vec<String> = reference
                .keys_for_ordinals(&ordinals)?
                .iter()
                .map(|k| display_key(k))
                .collect();
            keys.sort();
            keys
        } else {
            Vec::new()
        };

        let checked = self.matched + self.unmatched;
        let overlap_pct = if checked > 0 {
            self.matched as f64 / checked as f64 * 100.
        } else {
            0.0
        };
        let passed = match mode {
            MatchMode::ExactMatch => self.unmatched == 0 && (allow_nulls || self.null_rows == 0),
            MatchMode::Overlap { min_pct } => overlap_pct >= min_pct,
            MatchMode::Subset => self.unmatched == 0,
            MatchMode::SupersetOf => missing_reference_keys == 0,
        };

        Ok(MatchReport {
            mode,
            allow_nulls,
            subject_rows: self.rows,
            null_rows: self.null_rows,
            matched: self.matched,
            unmatched: self.unmatched,
            unmatched_samples: self.unmatched_samples.clone(),
            reference_keys,
            reference_keys_seen,
            missing_reference_keys,
            missing_reference_samples,
            overlap_pct,
            passed,
        })
    }
}

/// Checks subject streams against a reference index.
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    mode: MatchMode,
    allow_nulls: bool,
    max_samples: usize,
}

impl KeyMatcher {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            allow_nulls: false,
            max_samples: 100,
        }
    }

    pub fn with_allow_nulls(self, allow_nulls: bool) -> Self {
        Self {
            allow_nulls,
            ..self
        }
    }

    pub fn with_max_samples(self, max_samples: usize) -> Self {
        Self {
            max_samples,
            ..self
        }
    }

    pub fn build_reference(
        source: &mut dyn ChunkSource,
        columns: &[String],
        ctx: &RunContext,
    ) -> Result<ReferenceIndex, CoreError> {
        ReferenceIndex::build(source, columns, ctx, "reference")
    }

    /// Drain `subject` and report how its keys relate to `reference`.
    pub fn evaluate(
        &self,
        reference: &ReferenceIndex,
        subject: &mut dyn ChunkSource,
        columns: &[String],
    ) -> Result<MatchReport, CoreError> {
        self.mode.validate()?;
        let mut state = MatchState::new(reference, self.max_samples);
        for chunk in subject {
            state.observe(reference, &chunk?, columns, 0)?;
        }
        state.report(reference, self.mode, self.allow_nulls)
    }
}
