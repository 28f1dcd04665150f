//! Client side: ship a sweep to a runner and collect its results.

use chrono::Utc;
use std::fs;
use std::io::Write;
use tracing::{info, warn};
use uuid::Uuid;

use xp_types::{internal_error, AggregateResult, Configuration, Dataset, RemoteError, XpResult};

use crate::request::{decode_results, encode_request, request_name, result_name};
use crate::transport::Transport;

/// Runs whole sweeps on a remote runner reached through a [`Transport`].
#[derive(Debug)]
pub struct RemoteExperimenter<T> {
    runner_name: String,
    transport: T,
    datasets: Vec<Dataset>,
    pool_size: usize,
    seed: Option<u64>,
}

impl<T: Transport> RemoteExperimenter<T> {
    pub fn new(
        runner_name: impl Into<String>,
        transport: T,
        datasets: Vec<Dataset>,
        pool_size: usize,
    ) -> Self {
        Self {
            runner_name: runner_name.into(),
            transport,
            datasets,
            pool_size,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Evaluate `configurations` remotely; `result[i]` belongs to
    /// `configurations[i]`.
    pub fn run_all(&self, configurations: &[Configuration]) -> XpResult<Vec<AggregateResult>> {
        if !self.transport.is_ready() {
            warn!(runner = %self.runner_name, "Runner is not ready");
            return Err(RemoteError::RunnerNotReady {
                runner: self.runner_name.clone(),
            }
            .into());
        }

        let id = Uuid::new_v4();
        let name = request_name(id);
        let bytes = encode_request(
            id,
            Utc::now(),
            configurations,
            &self.datasets,
            self.pool_size,
            self.seed,
        )?;

        let mut request_file = tempfile::NamedTempFile::new()?;
        request_file.write_all(&bytes)?;
        request_file.flush()?;

        info!(
            runner = %self.runner_name,
            request = %name,
            configurations = configurations.len(),
            bytes = bytes.len(),
            "Sending sweep request"
        );
        self.transport.send_file(request_file.path(), &name)?;
        self.transport.invoke_runner(&name)?;

        let scratch = tempfile::tempdir()?;
        let result_file = scratch.path().join(result_name(&name));
        self.transport.retrieve_file(&result_name(&name), &result_file)?;
        let results = decode_results(&fs::read(&result_file)?)?;

        if results.len() != configurations.len() {
            return Err(internal_error!(
                "runner {} returned {} results for {} configurations",
                self.runner_name,
                results.len(),
                configurations.len()
            ));
        }
        info!(runner = %self.runner_name, request = %name, "Remote sweep completed");
        Ok(results)
    }
}
