use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    config::EngineConfig,
    errors::CoreError,
    tracking::{KeyTrackerConfig, SpillTarget, store::sanitize_namespace},
    utils::hasher::key_hash,
};

/// Per-run state handed to every component that needs configuration,
/// seeds or a spill namespace.
///
/// Clones share the namespace sequence, so stores opened through any clone
/// never collide.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    config: EngineConfig,
    spill_target: SpillTarget,
    token: String,
    stores: Arc<AtomicU64>,
}

/// Longest encoded run id or label kept in a namespace.
const MAX_NAMESPACE_PART: usize = 48;

impl RunContext {
    /// Validates `config`; the only point where a run can fail before reading.
    pub fn new(run_id: impl Into<String>, config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let spill_target = config.spill_target();
        Ok(Self {
            run_id: run_id.into(),
            config,
            spill_target,
            token: format!("{:08x}", rand::random::<u32>()),
            stores: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_spill_target(self, spill_target: SpillTarget) -> Self {
        Self {
            spill_target,
            ..self
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn spill_target(&self) -> &SpillTarget {
        &self.spill_target
    }

    /// Seed for the sampler in `slot`. Stable for a given run seed.
    pub fn seed_for(&self, slot: usize) -> u64 {
        // splitmix64 finalizer
        let mut z = self
            .config
            .sampling
            .seed
            .wrapping_add((slot as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Seed for a sampler identified by name rather than position.
    pub fn seed_for_label(&self, label: &str) -> u64 {
        self.seed_for(key_hash(label.as_bytes()) as usize)
    }

    /// Storage namespace for a new tracker.
    ///
    /// Every call returns a fresh namespace, so two trackers never share a
    /// store even when their labels encode alike or a run id is reused.
    /// `role` must be a plain alphanumeric word.
    pub fn namespace(&self, role: &str, label: &str) -> String {
        let seq = self.stores.fetch_add(1, Ordering::Relaxed);
        let mut run = sanitize_namespace(&self.run_id);
        run.truncate(MAX_NAMESPACE_PART);
        let mut label = sanitize_namespace(label);
        label.truncate(MAX_NAMESPACE_PART);
        format!("{run}-{}-{role}-{label}-{seq}", self.token)
    }

    pub fn tracker_config(&self, max_matches: Option<u64>) -> KeyTrackerConfig {
        KeyTrackerConfig {
            max_memory_keys: self.config.max_memory_keys,
            expected_keys: None,
            false_positive_rate: self.config.bloom_false_positive_rate,
            max_matches,
            use_bloom: true,
        }
    }
}
