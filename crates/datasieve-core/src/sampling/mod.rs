//! Bounded samples with population-level estimates.
pub mod confidence;
pub mod reservoir;
pub mod sequential;
pub mod stratified;

pub use confidence::{
    ConfidenceInterval, PopulationEstimate, estimate_population, required_sample_size,
    wald_interval, z_for_confidence,
};
pub use reservoir::ReservoirSampler;
pub use sequential::{Decision, SequentialTest};
pub use stratified::{StratifiedSampler, StratifiedStats};
