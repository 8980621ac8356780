//! Memory-bounded exact key tracking.
//!
//! Keys live in an in-memory map until `max_memory_keys` distinct keys have
//! been seen. At that point every key moves to a spill store and all later
//! keys go there too; the overflow is one-way. A bloom filter in front of
//! both tiers rejects unseen keys without a lookup, and every "maybe" answer
//! is confirmed against the owning tier, so decisions stay exact.
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, trace, warn};

use crate::{
    errors::CoreError,
    tracking::{
        bloom::BloomFilter,
        store::{SpillStore, SpillTarget},
    },
    utils::hasher::{Xxh3Builder, key_hash},
};

#[derive(Debug, Clone)]
pub struct KeyTrackerConfig {
    /// Distinct keys held in memory before spilling.
    pub max_memory_keys: usize,
    /// Bloom filter sizing hint. Defaults to `max_memory_keys`.
    pub expected_keys: Option<usize>,
    pub false_positive_rate: f64,
    /// Stop recording duplicates once this many were found.
    pub max_matches: Option<u64>,
    pub use_bloom: bool,
}

impl Default for KeyTrackerConfig {
    fn default() -> Self {
        Self {
            max_memory_keys: 1_000_000,
            expected_keys: None,
            false_positive_rate: 0.01,
            max_matches: None,
            use_bloom: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerStats {
    pub distinct_keys: u64,
    pub duplicate_keys: u64,
    pub total_added: u64,
    pub memory_keys: usize,
    pub spilled: bool,
    pub stopped_early: bool,
    pub bloom_false_positives: u64,
}

pub struct KeyTracker {
    namespace: String,
    memory: HashMap<Box<[u8]>, u64, Xxh3Builder>,
    bloom: Option<BloomFilter>,
    store: Option<Box<dyn SpillStore>>,
    target: SpillTarget,
    max_memory_keys: usize,
    max_matches: Option<u64>,
    distinct: u64,
    duplicates: u64,
    total_added: u64,
    bloom_false_positives: u64,
    stopped_early: bool,
}

impl KeyTracker {
    pub fn new(namespace: impl Into<String>, config: &KeyTrackerConfig, target: SpillTarget) -> Self {
        let bloom = config.use_bloom.then(|| {
            let expected = config.expected_keys.unwrap_or(config.max_memory_keys);
            BloomFilter::new(expected, config.false_positive_rate)
        });
        Self {
            namespace: namespace.into(),
            memory: HashMap::with_hasher(Xxh3Builder),
            bloom,
            store: None,
            target,
            max_memory_keys: config.max_memory_keys,
            max_matches: config.max_matches,
            distinct: 0,
            duplicates: 0,
            total_added: 0,
            bloom_false_positives: 0,
            stopped_early: false,
        }
    }

    /// Record `key`. Returns `true` when it was not seen before.
    ///
    /// Once the duplicate limit is reached the tracker stops recording and
    /// every call returns `Ok(false)`.
    pub fn add(&mut self, key: &[u8]) -> Result<bool, CoreError> {
        if self.stopped_early {
            return Ok(false);
        }
        self.total_added += 1;
        let hash = key_hash(key);

        let maybe_present = self.bloom.as_ref().is_none_or(|b| b.might_contain(key));
        if maybe_present {
            if self.find(hash, key)?.is_some() {
                self.record_duplicate();
                return Ok(false);
            }
            if self.bloom.is_some() {
                self.bloom_false_positives += 1;
                trace!(namespace = %self.namespace, "bloom false positive confirmed absent");
            }
        }

        self.insert_new(hash, key)?;
        Ok(true)
    }

    /// Exact membership test.
    pub fn contains(&self, key: &[u8]) -> Result<bool, CoreError> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Insertion ordinal of `key`, if present.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<u64>, CoreError> {
        if let Some(bloom) = &self.bloom {
            if !bloom.might_contain(key) {
                return Ok(None);
            }
        }
        self.find(key_hash(key), key)
    }

    /// Number of distinct keys recorded.
    pub fn count(&self) -> usize {
        self.distinct as usize
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates
    }

    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    pub fn is_spilled(&self) -> bool {
        self.store.is_some()
    }

    pub fn memory_keys(&self) -> usize {
        self.memory.len()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            distinct_keys: self.distinct,
            duplicate_keys: self.duplicates,
            total_added: self.total_added,
            memory_keys: self.memory.len(),
            spilled: self.store.is_some(),
            stopped_early: self.stopped_early,
            bloom_false_positives: self.bloom_false_positives,
        }
    }

    /// Keys for the given ordinals, in no particular order.
    pub fn keys_for_ordinals(&self, ordinals: &[u64]) -> Result<Vec<Vec<u8>>, CoreError> {
        match &self.store {
            Some(store) => {
                let mut keys = Vec::with_capacity(ordinals.len());
                for &ordinal in ordinals {
                    if let Some(key) = store.key_for_ordinal(ordinal)? {
                        keys.push(key);
                    }
                }
                Ok(keys)
            }
            None => {
                let wanted: HashSet<u64> = ordinals.iter().copied().collect();
                Ok(self
                    .memory
                    .iter()
                    .filter(|(_, ordinal)| wanted.contains(ordinal))
                    .map(|(key, _)| key.to_vec())
                    .collect())
            }
        }
    }

    /// Release the spill store. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), CoreError> {
        self.memory = HashMap::with_hasher(Xxh3Builder);
        match self.store.take() {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }

    fn find(&self, hash: u64, key: &[u8]) -> Result<Option<u64>, CoreError> {
        match &self.store {
            Some(store) => store.lookup(hash, key),
            None => Ok(self.memory.get(key).copied()),
        }
    }

    fn record_duplicate(&mut self) {
        self.duplicates += 1;
        if let Some(limit) = self.max_matches {
            if self.duplicates >= limit {
                self.stopped_early = true;
                info!(
                    namespace = %self.namespace,
                    duplicates = self.duplicates,
                    "duplicate limit reached, tracker stopped early"
                );
            }
        }
    }

    fn insert_new(&mut self, hash: u64, key: &[u8]) -> Result<(), CoreError> {
        let ordinal = self.distinct;
        if self.store.is_none() && self.memory.len() >= self.max_memory_keys {
            self.spill()?;
        }
        match self.store.as_mut() {
            Some(store) => store.insert(hash, key, ordinal)?,
            None => {
                self.memory.insert(key.into(), ordinal);
            }
        }
        if let Some(bloom) = self.bloom.as_mut() {
            bloom.insert(key);
        }
        self.distinct += 1;
        Ok(())
    }

    /// Move every in-memory key into a freshly opened store.
    fn spill(&mut self) -> Result<(), CoreError> {
        warn!(
            namespace = %self.namespace,
            keys = self.memory.len(),
            limit = self.max_memory_keys,
            "in-memory key limit reached, spilling to persistent store"
        );
        let mut store = self.target.open(&self.namespace)?;
        let filled = self
            .memory
            .iter()
            .try_for_each(|(key, ordinal)| store.insert(key_hash(key), key, *ordinal))
            .and_then(|()| store.flush());
        if let Err(e) = filled {
            // Keys stay in memory; the partial store is discarded
            if let Err(close_err) = store.close() {
                warn!(namespace = %self.namespace, error = %close_err, "failed to discard partial spill store");
            }
            return Err(e);
        }
        self.memory = HashMap::with_hasher(Xxh3Builder);
        self.store = Some(store);
        Ok(())
    }
}

impl Drop for KeyTracker {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(namespace = %self.namespace, error = %e, "failed to close spill store");
        }
    }
}
