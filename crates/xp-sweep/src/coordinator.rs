//! Fan a sweep out over a worker pool sharing published datasets.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use xp_shared::SharedArena;
use xp_types::{
    validation_error, AggregateResult, Configuration, Dataset, DatasetHandle, EvaluatorError,
    SweepError, XpResult,
};

use crate::config::SweepConfig;
use crate::evaluator::Evaluator;
use crate::progress::{self, ProgressReporter, ProgressUpdate};

type ProgressObserver = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Runs sweeps: publishes the datasets once, evaluates every configuration on
/// a fixed-size pool, and releases the segments however the sweep ends.
pub struct ExperimentCoordinator {
    config: SweepConfig,
    arena: SharedArena,
    observer: Option<ProgressObserver>,
}

impl std::fmt::Debug for ExperimentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentCoordinator")
            .field("config", &self.config)
            .field("arena", &self.arena)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl ExperimentCoordinator {
    pub fn new(config: SweepConfig) -> XpResult<Self> {
        let arena = config.arena()?;
        Ok(Self::with_arena(config, arena))
    }

    pub fn with_arena(config: SweepConfig, arena: SharedArena) -> Self {
        Self {
            config,
            arena,
            observer: None,
        }
    }

    /// Receive every progress update of every sweep, starting at 0.
    pub fn with_progress_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// Evaluate every configuration against every dataset.
    ///
    /// `result[i]` belongs to `configurations[i]`. The first failing
    /// configuration fails the whole sweep once in-flight tasks have drained;
    /// published segments are released on every path.
    pub fn run_sweep<E>(
        &self,
        datasets: &[Dataset],
        configurations: &[Configuration],
        evaluator: &E,
    ) -> XpResult<Vec<AggregateResult>>
    where
        E: Evaluator + ?Sized,
    {
        if datasets.is_empty() {
            return Err(validation_error!("a sweep needs at least one dataset"));
        }
        let pool_size = self.config.pool_size;
        if pool_size == 0 {
            return Err(SweepError::PoolStartupFailed {
                pool_size,
                message: "pool size must be positive".to_string(),
            }
            .into());
        }
        if configurations.is_empty() {
            info!("Empty sweep, nothing to dispatch");
            return Ok(Vec::new());
        }

        info!(
            configurations = configurations.len(),
            datasets = datasets.len(),
            pool_size,
            "Starting sweep"
        );

        // Published once per sweep; each token unlinks its segments when
        // released or dropped, so an early return cannot leak them.
        let mut handles = Vec::with_capacity(datasets.len());
        let mut tokens = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let (handle, token) = self.arena.publish(dataset)?;
            handles.push(handle);
            tokens.push(token);
        }

        let outcome = self.dispatch(&handles, configurations, evaluator);

        for token in tokens {
            if let Err(e) = token.release() {
                warn!(error = %e, "Failed to release dataset segments");
            }
        }

        match &outcome {
            Ok(results) => info!(results = results.len(), "Sweep completed"),
            Err(e) => error!(error = %e, "Sweep failed"),
        }
        outcome
    }

    fn dispatch<E>(
        &self,
        handles: &[DatasetHandle],
        configurations: &[Configuration],
        evaluator: &E,
    ) -> XpResult<Vec<AggregateResult>>
    where
        E: Evaluator + ?Sized,
    {
        let pool_size = self.config.pool_size;
        let pool = ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("xp-worker-{i}"))
            .build()
            .map_err(|e| SweepError::PoolStartupFailed {
                pool_size,
                message: e.to_string(),
            })?;

        let (reporter, monitor) = progress::channel(configurations.len());
        let progress = match &self.observer {
            Some(observer) => {
                let observer = Arc::clone(observer);
                monitor.spawn_with(move |update| (*observer)(update))?
            }
            None => monitor.spawn()?,
        };

        let seed = self.config.seed;
        let results = pool.install(|| {
            configurations
                .par_iter()
                .enumerate()
                .map(|(index, configuration)| {
                    self.run_configuration(handles, index, configuration, evaluator, seed, &reporter)
                })
                .collect::<XpResult<Vec<_>>>()
        });
        drop(reporter);

        let finished = if results.is_ok() {
            progress.join()
        } else {
            progress.abort()
        };
        // progress never decides the outcome of a sweep
        match finished {
            Ok(consumed) => debug!(consumed, "Progress consumer finished"),
            Err(e) => warn!(error = %e, "Progress consumer failed"),
        }

        results
    }

    /// One worker task: attach, evaluate on each dataset, aggregate.
    fn run_configuration<E>(
        &self,
        handles: &[DatasetHandle],
        index: usize,
        configuration: &Configuration,
        evaluator: &E,
        seed: Option<u64>,
        reporter: &ProgressReporter,
    ) -> XpResult<AggregateResult>
    where
        E: Evaluator + ?Sized,
    {
        let views = handles
            .iter()
            .map(|handle| self.arena.attach_dataset(handle))
            .collect::<XpResult<Vec<_>>>()?;

        let mut scores = Vec::with_capacity(views.len());
        for view in &views {
            let dataset = view.as_dataset_ref();
            let score = panic::catch_unwind(AssertUnwindSafe(|| {
                evaluator.evaluate(configuration, &dataset, seed)
            }))
            .unwrap_or_else(|payload| Err(EvaluatorError::from(panic_message(payload.as_ref()))))
            .map_err(|cause| SweepError::EvaluationFailed { index, cause })?;
            scores.push(score);
        }

        let result = AggregateResult::from_scores(*configuration, &scores);
        debug!(
            index,
            mean = result.mean,
            stddev = result.stddev,
            "Configuration evaluated"
        );
        reporter.done();
        Ok(result)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("evaluator panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("evaluator panicked: {message}")
    } else {
        "evaluator panicked".to_string()
    }
}
