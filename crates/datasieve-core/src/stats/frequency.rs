use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::hasher::Xxh3Builder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

/// Exact value frequencies for columns of bounded cardinality.
///
/// At most `max_tracked` distinct values get their own counter. Occurrences
/// of values first seen after that are counted in `untracked`.
pub struct FrequencyCounter {
    counts: HashMap<String, u64, Xxh3Builder>,
    max_tracked: usize,
    untracked: u64,
    total: u64,
}

impl FrequencyCounter {
    pub fn new(max_tracked: usize) -> Self {
        Self {
            counts: HashMap::with_hasher(Xxh3Builder),
            max_tracked,
            untracked: 0,
            total: 0,
        }
    }

    pub fn add(&mut self, value: &str) {
        self.total += 1;
        if let Some(count) = self.counts.get_mut(value) {
            *count += 1;
        } else if self.counts.len() < self.max_tracked {
            self.counts.insert(value.to_string(), 1);
        } else {
            self.untracked += 1;
        }
    }

    /// Most frequent values, ties broken by value.
    pub fn top_k(&self, k: usize) -> Vec<ValueCount> {
        let mut entries: Vec<(&String, &u64)> = self.counts.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        entries
            .into_iter()
            .take(k)
            .map(|(value, count)| ValueCount {
                value: value.clone(),
                count: *count,
            })
            .collect()
    }

    pub fn distinct_tracked(&self) -> usize {
        self.counts.len()
    }

    pub fn untracked(&self) -> u64 {
        self.untracked
    }

    /// Some distinct values were not counted individually.
    pub fn is_truncated(&self) -> bool {
        self.untracked > 0
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
