mod accumulator;
mod execution_engine;
mod stats_accumulator;

#[cfg(test)]
mod tests;

pub use accumulator::ResultAccumulator;
pub use execution_engine::{ExecutionEngine, Job};
pub use stats_accumulator::StatsAccumulator;
