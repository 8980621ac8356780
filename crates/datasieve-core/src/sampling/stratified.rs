//! Stratified sampling with a per-category cap and a global cap.
//!
//! Items of a category whose cap is reached are dropped, which
//! under-samples dominant strata. The global cap is checked first, so when
//! both caps are hit by the same item it is counted as a global drop.
use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StratifiedStats {
    pub seen: u64,
    pub sampled: usize,
    pub categories: usize,
    pub dropped_category_cap: u64,
    pub dropped_global_cap: u64,
}

pub struct StratifiedSampler<T> {
    per_category_cap: usize,
    global_cap: usize,
    strata: BTreeMap<String, Vec<T>>,
    sampled: usize,
    seen: u64,
    dropped_category_cap: u64,
    dropped_global_cap: u64,
}

impl<T> StratifiedSampler<T> {
    pub fn new(per_category_cap: usize, global_cap: usize) -> Self {
        Self {
            per_category_cap,
            global_cap,
            strata: BTreeMap::new(),
            sampled: 0,
            seen: 0,
            dropped_category_cap: 0,
            dropped_global_cap: 0,
        }
    }

    /// Offer `value` for `category`. Returns `true` when it was kept.
    pub fn add(&mut self, value: T, category: &str) -> bool {
        self.seen += 1;
        if self.sampled >= self.global_cap {
            self.dropped_global_cap += 1;
            return false;
        }
        if let Some(stratum) = self.strata.get_mut(category) {
            if stratum.len() >= self.per_category_cap {
                self.dropped_category_cap += 1;
                return false;
            }
            stratum.push(value);
        } else {
            if self.per_category_cap == 0 {
                self.dropped_category_cap += 1;
                return false;
            }
            self.strata.insert(category.to_string(), vec![value]);
        }
        self.sampled += 1;
        true
    }

    pub fn category_sample(&self, category: &str) -> Option<&[T]> {
        self.strata.get(category).map(Vec::as_slice)
    }

    /// Samples grouped by category, ordered by category name.
    pub fn strata(&self) -> &BTreeMap<String, Vec<T>> {
        &self.strata
    }

    pub fn len(&self) -> usize {
        self.sampled
    }

    pub fn is_empty(&self) -> bool {
        self.sampled == 0
    }

    pub fn stats(&self) -> StratifiedStats {
        StratifiedStats {
            seen: self.seen,
            sampled: self.sampled,
            categories: self.strata.len(),
            dropped_category_cap: self.dropped_category_cap,
            dropped_global_cap: self.dropped_global_cap,
        }
    }
}

impl<T: Clone> StratifiedSampler<T> {
    /// Flattened sample, ordered by category name then arrival.
    pub fn get_sample(&self) -> Vec<T> {
        self.strata.values().flatten().cloned().collect()
    }
}
