use tracing::warn;

use crate::{
    chunk::Chunk,
    context::RunContext,
    errors::CoreError,
    stats::{ColumnProfile, ColumnProfiler},
};

/// Profiles of the configured statistics columns.
pub struct StatsAccumulator {
    profilers: Vec<ColumnProfiler>,
}

impl StatsAccumulator {
    pub fn new(ctx: &RunContext) -> Self {
        let config = ctx.config();
        let profilers = config
            .stats_columns
            .iter()
            .map(|column| {
                let profiler = ColumnProfiler::new(
                    column.clone(),
                    config.top_k,
                    config.max_tracked_categories,
                    config.histogram_bins,
                );
                let profiler = if config.sample_profiles {
                    let seed = ctx.seed_for_label(&format!("profile_{column}"));
                    profiler.with_sample(config.sampling.sample_size, seed)
                } else {
                    profiler
                };
                match &config.stratify_by {
                    Some(by) => profiler.with_strata(
                        by.clone(),
                        config.stratum_sample_size,
                        config.sampling.sample_size,
                    ),
                    None => profiler,
                }
            })
            .collect();
        Self { profilers }
    }

    pub fn is_empty(&self) -> bool {
        self.profilers.is_empty()
    }

    pub fn update(&mut self, chunk: &Chunk) -> Result<(), CoreError> {
        for profiler in self.profilers.iter_mut().filter(|p| !p.is_failed()) {
            match profiler.update(chunk) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(column = profiler.column(), error = %e, "column profile failed");
                    profiler.fail(&e);
                }
            }
        }
        Ok(())
    }

    /// Mark every profile as incomplete.
    pub fn fail_all(&mut self, error: &CoreError) {
        for profiler in self.profilers.iter_mut().filter(|p| !p.is_failed()) {
            profiler.fail(error);
        }
    }

    pub fn finalize(mut self) -> Vec<ColumnProfile> {
        self.profilers.iter_mut().map(|p| p.finalize()).collect()
    }
}
