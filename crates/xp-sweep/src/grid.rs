//! Exhaustive configuration grids.

use serde::{Deserialize, Serialize};

use xp_types::Configuration;

/// Axis values for each configuration field; the sweep is their cartesian
/// product.
///
/// Unset axes keep a single default value (100 neurons, 1 layer, 200 epochs,
/// learning rate 0.001, momentum 0.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationGrid {
    pub neurons: Vec<usize>,
    pub layers: Vec<usize>,
    pub epochs: Vec<usize>,
    pub learning_rates: Vec<f64>,
    pub momentums: Vec<f64>,
}

impl Default for ConfigurationGrid {
    fn default() -> Self {
        Self {
            neurons: vec![100],
            layers: vec![1],
            epochs: vec![200],
            learning_rates: vec![0.001],
            momentums: vec![0.9],
        }
    }
}

impl ConfigurationGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn neurons(mut self, values: impl IntoIterator<Item = usize>) -> Self {
        self.neurons = values.into_iter().collect();
        self
    }

    pub fn layers(mut self, values: impl IntoIterator<Item = usize>) -> Self {
        self.layers = values.into_iter().collect();
        self
    }

    pub fn epochs(mut self, values: impl IntoIterator<Item = usize>) -> Self {
        self.epochs = values.into_iter().collect();
        self
    }

    pub fn learning_rates(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.learning_rates = values.into_iter().collect();
        self
    }

    /// `steps` learning rates evenly spaced in log-space over `[low, high]`.
    pub fn log_learning_rates(mut self, low: f64, high: f64, steps: usize) -> Self {
        let steps = steps.max(2);
        let (log_low, log_high) = (low.ln(), high.ln());
        self.learning_rates = (0..steps)
            .map(|i| {
                let t = i as f64 / (steps - 1) as f64;
                (log_low + t * (log_high - log_low)).exp()
            })
            .collect();
        self
    }

    pub fn momentums(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.momentums = values.into_iter().collect();
        self
    }

    /// Number of configurations, or `None` on overflow.
    pub fn len(&self) -> Option<usize> {
        [
            self.neurons.len(),
            self.layers.len(),
            self.epochs.len(),
            self.learning_rates.len(),
            self.momentums.len(),
        ]
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Expand the grid; the neuron axis varies slowest, momentum fastest.
    pub fn build(&self) -> Vec<Configuration> {
        let mut configurations = Vec::with_capacity(self.len().unwrap_or(0));

        for &neurons in &self.neurons {
            for &layers in &self.layers {
                for &epochs in &self.epochs {
                    for &learning_rate in &self.learning_rates {
                        for &momentum in &self.momentums {
                            configurations.push(Configuration::new(
                                neurons,
                                layers,
                                epochs,
                                learning_rate,
                                momentum,
                            ));
                        }
                    }
                }
            }
        }

        configurations
    }
}
