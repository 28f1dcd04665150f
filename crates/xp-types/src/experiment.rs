//! Sweep configurations and their per-configuration aggregates.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One point of a hyper-parameter sweep.
///
/// Counts are expected to be positive; that is the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Neurons per hidden layer.
    pub neurons: usize,
    /// Number of hidden layers.
    pub layers: usize,
    /// Training epochs (maximum iterations for the trainer).
    pub epochs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
}

impl Configuration {
    pub fn new(neurons: usize, layers: usize, epochs: usize, learning_rate: f64, momentum: f64) -> Self {
        Self {
            neurons,
            layers,
            epochs,
            learning_rate,
            momentum,
        }
    }

    /// Hidden layer sizes, `neurons` repeated `layers` times.
    pub fn hidden_layer_sizes(&self) -> Vec<usize> {
        vec![self.neurons; self.layers]
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "neurons={} layers={} epochs={} lr={} momentum={}",
            self.neurons, self.layers, self.epochs, self.learning_rate, self.momentum
        )
    }
}

/// Summary of one configuration evaluated against every dataset.
///
/// JSON has no NaN or infinity; such values are written as `null` and read
/// back as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub configuration: Configuration,
    /// Per-dataset scores scaled to percent, in dataset order.
    #[serde(deserialize_with = "scores_or_nan")]
    pub scores: Vec<f64>,
    /// Mean score, in percent.
    #[serde(deserialize_with = "score_or_nan")]
    pub mean: f64,
    /// Population standard deviation of the scores, in percent.
    #[serde(deserialize_with = "score_or_nan")]
    pub stddev: f64,
}

fn score_or_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

fn scores_or_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    let scores = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(scores.into_iter().map(|s| s.unwrap_or(f64::NAN)).collect())
}

impl AggregateResult {
    /// Build an aggregate from raw evaluator scores (fractions in `[0, 1]`).
    ///
    /// An empty score list yields NaN statistics.
    pub fn from_scores(configuration: Configuration, raw_scores: &[f64]) -> Self {
        let mean = mean(raw_scores) * 100.0;
        let stddev = population_stddev(raw_scores) * 100.0;

        Self {
            configuration,
            scores: raw_scores.iter().map(|s| s * 100.0).collect(),
            mean,
            stddev,
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation normalized by N.
// TODO: offer N-1 (sample) normalization once callers report error bars for few splits.
pub fn population_stddev(values: &[f64]) -> f64 {
    let mean = mean(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
