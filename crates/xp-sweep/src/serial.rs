//! Single-threaded sweep: no pool, no shared segments.

use tracing::info;

use xp_types::{validation_error, AggregateResult, Configuration, Dataset, SweepError, XpResult};

use crate::evaluator::Evaluator;

/// Evaluate every configuration against every dataset on the calling thread.
///
/// Produces the same results as
/// [`ExperimentCoordinator::run_sweep`](crate::ExperimentCoordinator::run_sweep)
/// for deterministic evaluators.
pub fn run_serial<E>(
    datasets: &[Dataset],
    configurations: &[Configuration],
    seed: Option<u64>,
    evaluator: &E,
) -> XpResult<Vec<AggregateResult>>
where
    E: Evaluator + ?Sized,
{
    if datasets.is_empty() {
        return Err(validation_error!("a sweep needs at least one dataset"));
    }
    info!(
        configurations = configurations.len(),
        datasets = datasets.len(),
        "Starting serial sweep"
    );

    configurations
        .iter()
        .enumerate()
        .map(|(index, configuration)| {
            let scores = datasets
                .iter()
                .map(|dataset| {
                    evaluator
                        .evaluate(configuration, &dataset.as_dataset_ref(), seed)
                        .map_err(|cause| SweepError::EvaluationFailed { index, cause }.into())
                })
                .collect::<XpResult<Vec<f64>>>()?;
            Ok(AggregateResult::from_scores(*configuration, &scores))
        })
        .collect()
}
