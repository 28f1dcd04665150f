//! The seam between the sweep and the external trainer.

use xp_types::{Configuration, DatasetRef, EvaluatorError};

/// Trains and scores one configuration on one dataset.
///
/// Implementations return a fraction in `[0, 1]` (accuracy-like; not
/// validated). They may be slow and CPU-bound, and are called concurrently
/// from several workers. Any diagnostics they emit are their own business.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        configuration: &Configuration,
        dataset: &DatasetRef<'_>,
        seed: Option<u64>,
    ) -> Result<f64, EvaluatorError>;
}

impl<E: Evaluator + ?Sized> Evaluator for std::sync::Arc<E> {
    fn evaluate(
        &self,
        configuration: &Configuration,
        dataset: &DatasetRef<'_>,
        seed: Option<u64>,
    ) -> Result<f64, EvaluatorError> {
        (**self).evaluate(configuration, dataset, seed)
    }
}

/// Evaluator backed by a closure.
pub struct FnEvaluator<F> {
    f: F,
}

pub fn from_fn<F>(f: F) -> FnEvaluator<F>
where
    F: Fn(&Configuration, &DatasetRef<'_>, Option<u64>) -> Result<f64, EvaluatorError>
        + Send
        + Sync,
{
    FnEvaluator { f }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&Configuration, &DatasetRef<'_>, Option<u64>) -> Result<f64, EvaluatorError>
        + Send
        + Sync,
{
    fn evaluate(
        &self,
        configuration: &Configuration,
        dataset: &DatasetRef<'_>,
        seed: Option<u64>,
    ) -> Result<f64, EvaluatorError> {
        (self.f)(configuration, dataset, seed)
    }
}
