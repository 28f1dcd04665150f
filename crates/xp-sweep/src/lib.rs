//! # xp-sweep
//!
//! Hyper-parameter sweep coordination.
//!
//! [`ExperimentCoordinator::run_sweep`] publishes the datasets into shared
//! segments once, evaluates every [`Configuration`](xp_types::Configuration)
//! on a fixed-size worker pool, streams completion tokens to a progress
//! consumer, and returns one [`AggregateResult`](xp_types::AggregateResult)
//! per configuration in input order. [`run_serial`] is the pool-free variant.
//!
//! Workers are threads of a `rayon` pool sized to `pool_size`, not separate
//! processes. They never touch the caller's datasets: each task attaches the
//! published segments by [`DatasetHandle`](xp_types::DatasetHandle) exactly
//! as another process on the same segment root would, so isolation rests on
//! the handles and not on address-space separation.

mod config;
mod coordinator;
mod evaluator;
mod grid;
pub mod progress;
mod serial;

pub use config::{
    SweepConfig, ENV_ARENA_CAPACITY, ENV_POOL_SIZE, ENV_SEED, ENV_SHM_DIR,
};
pub use coordinator::ExperimentCoordinator;
pub use evaluator::{from_fn, Evaluator, FnEvaluator};
pub use grid::ConfigurationGrid;
pub use progress::{ProgressHandle, ProgressMonitor, ProgressReporter, ProgressUpdate};
pub use serial::run_serial;
