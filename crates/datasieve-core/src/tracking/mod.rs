//! Exact key tracking under a memory bound.
pub mod bloom;
pub mod store;
pub mod tracker;

pub use bloom::BloomFilter;
pub use store::{MemorySpillStore, SpillStore, SpillStoreFactory, SpillTarget, SqliteSpillStore};
pub use tracker::{KeyTracker, KeyTrackerConfig, TrackerStats};
