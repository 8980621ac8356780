use std::{collections::HashSet, path::Path, sync::Arc, time::Instant};

use arrow::datatypes::{Schema, SchemaRef};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::{accumulator::ResultAccumulator, stats_accumulator::StatsAccumulator};
use crate::{
    compiler::{CompiledRule, compile_rules},
    config::EngineConfig,
    context::RunContext,
    chunk::Chunk,
    errors::CoreError,
    readers::open_source_for,
    results::RunOutcome,
    rules::{RuleSpec, StreamingRule},
    source::ChunkSource,
    tracking::SpillTarget,
};

/// One independent stream and the rules to run over it.
pub struct Job {
    pub name: String,
    pub source: Box<dyn ChunkSource>,
    pub rules: Vec<RuleSpec>,
}

impl Job {
    pub fn new(name: impl Into<String>, source: Box<dyn ChunkSource>, rules: Vec<RuleSpec>) -> Self {
        Self {
            name: name.into(),
            source,
            rules,
        }
    }
}

/// Stands in for a file that could not be opened, so the failure is
/// reported per rule like any other source error.
struct UnopenedSource {
    error: Option<CoreError>,
    schema: SchemaRef,
}

impl UnopenedSource {
    fn new(error: CoreError) -> Self {
        Self {
            error: Some(error),
            schema: Arc::new(Schema::empty()),
        }
    }
}

impl Iterator for UnopenedSource {
    type Item = Result<Chunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.error.take().map(Err)
    }
}

impl ChunkSource for UnopenedSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

/// ExecutionEngine - pulls chunks from a source and drives every rule and
/// column profile over them, one chunk at a time.
///
/// Never holds more than the current chunk of source data. Rules keep
/// their own bounded state (trackers, samplers, accumulators).
pub struct ExecutionEngine {
    config: EngineConfig,
    spill_target: Option<SpillTarget>,
}

impl ExecutionEngine {
    /// Fails on an invalid configuration.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            config,
            spill_target: None,
        })
    }

    /// Spill somewhere other than the configured directory.
    pub fn with_spill_target(self, spill_target: SpillTarget) -> Self {
        Self {
            spill_target: Some(spill_target),
            ..self
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(&self, run_id: &str) -> Result<RunContext, CoreError> {
        let ctx = RunContext::new(run_id, self.config.clone())?;
        Ok(match &self.spill_target {
            Some(target) => ctx.with_spill_target(target.clone()),
            None => ctx,
        })
    }

    /// Compile `rules` and run them over `source`.
    ///
    /// Only configuration errors are returned as `Err`. Every other failure
    /// ends up in the outcome.
    pub fn run(
        &self,
        run_id: &str,
        source: &mut dyn ChunkSource,
        rules: &[RuleSpec],
    ) -> Result<RunOutcome, CoreError> {
        let ctx = self.context(run_id)?;
        let compiled = compile_rules(rules, &ctx)?;
        self.execute(&ctx, source, compiled)
    }

    /// Open `path` and run `rules` over it.
    ///
    /// Only the columns the rules and profiles read are decoded. With a
    /// memory budget configured, the chunk size is tuned to it.
    pub fn run_path(
        &self,
        run_id: &str,
        path: impl AsRef<Path>,
        rules: &[RuleSpec],
    ) -> Result<RunOutcome, CoreError> {
        let mut job = self.path_job(run_id, path, rules.to_vec());
        self.run(run_id, job.source.as_mut(), &job.rules)
    }

    /// Build a [`Job`] reading `path`, for use with [`Self::run_many`].
    /// A file that cannot be opened fails the job's rules when it runs.
    pub fn path_job(&self, name: impl Into<String>, path: impl AsRef<Path>, rules: Vec<RuleSpec>) -> Job {
        let path = path.as_ref();
        let columns = self.projection(&rules);
        let source: Box<dyn ChunkSource> = match open_source_for(path, &columns, &self.config, rules.len()) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not open source");
                Box::new(UnopenedSource::new(e))
            }
        };
        Job::new(name, source, rules)
    }

    fn projection(&self, rules: &[RuleSpec]) -> Vec<String> {
        let mut seen = HashSet::new();
        rules
            .iter()
            .flat_map(RuleSpec::columns)
            .chain(self.config.stats_columns.iter().cloned())
            .chain(self.config.stratify_by.iter().cloned())
            .filter(|column| seen.insert(column.clone()))
            .collect()
    }

    /// Run rules built outside the compiler.
    pub fn run_compiled(
        &self,
        run_id: &str,
        source: &mut dyn ChunkSource,
        rules: Vec<Box<dyn StreamingRule>>,
    ) -> Result<RunOutcome, CoreError> {
        let ctx = self.context(run_id)?;
        let compiled = rules.into_iter().map(CompiledRule::ready).collect();
        self.execute(&ctx, source, compiled)
    }

    /// Run independent jobs on the rayon pool. Outcomes come back in job
    /// order. Job names become run ids, so they must be unique.
    pub fn run_many(&self, jobs: Vec<Job>) -> Result<Vec<Result<RunOutcome, CoreError>>, CoreError> {
        let mut names = HashSet::new();
        for job in &jobs {
            if !names.insert(job.name.as_str()) {
                return Err(CoreError::config(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
        }
        info!(jobs = jobs.len(), "starting parallel runs");
        Ok(jobs
            .into_par_iter()
            .map(|mut job| self.run(&job.name, job.source.as_mut(), &job.rules))
            .collect())
    }

    fn execute(
        &self,
        ctx: &RunContext,
        source: &mut dyn ChunkSource,
        rules: Vec<CompiledRule>,
    ) -> Result<RunOutcome, CoreError> {
        let start = Instant::now();
        let mut accumulator = ResultAccumulator::new(rules, ctx.config().max_sample_failures)?;
        let mut stats = StatsAccumulator::new(ctx);
        info!(
            run_id = ctx.run_id(),
            rules = accumulator.len(),
            active_rules = accumulator.active_count(),
            stats_columns = ctx.config().stats_columns.len(),
            total_rows = ?source.total_rows(),
            "run started"
        );

        let mut rows_processed = 0u64;
        let mut chunks_processed = 0u64;
        let mut stopped_early = false;
        let mut source_error = None;

        let has_work = |acc: &ResultAccumulator, stats: &StatsAccumulator| {
            !acc.all_stopped() || !stats.is_empty()
        };

        if has_work(&accumulator, &stats) {
            for next in &mut *source {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(run_id = ctx.run_id(), error = %e, "source failed, stopping the run");
                        accumulator.fail_active(&e);
                        stats.fail_all(&e);
                        source_error = Some(e.to_string());
                        break;
                    }
                };
                accumulator.process_chunk(&chunk, ctx)?;
                stats.update(&chunk)?;
                rows_processed += chunk.num_rows() as u64;
                chunks_processed += 1;
                debug!(
                    run_id = ctx.run_id(),
                    chunk = chunks_processed,
                    offset = chunk.offset(),
                    rows = chunk.num_rows(),
                    active_rules = accumulator.active_count(),
                    "chunk processed"
                );
                if !has_work(&accumulator, &stats) {
                    info!(
                        run_id = ctx.run_id(),
                        rows = rows_processed,
                        "every rule stopped, no more chunks pulled"
                    );
                    stopped_early = true;
                    break;
                }
            }
        }

        let results = accumulator.finalize(ctx);
        let profiles = stats.finalize();
        let outcome = RunOutcome {
            run_id: ctx.run_id().to_string(),
            results,
            profiles,
            rows_processed,
            chunks_processed,
            stopped_early,
            source_error,
        };
        info!(
            run_id = ctx.run_id(),
            rows = rows_processed,
            chunks = chunks_processed,
            passed = outcome.all_passed(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(outcome)
    }
}
