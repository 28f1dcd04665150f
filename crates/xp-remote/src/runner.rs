//! Runner side of the request protocol.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

use xp_sweep::{Evaluator, ExperimentCoordinator, SweepConfig};
use xp_types::{RemoteError, XpResult};

use crate::request::{check_transfer_name, encode_results, result_name, SweepRequest};

/// Execute the request stored as `dir/name` and write its results next to it
/// as `result_<name>`.
///
/// Pool size and seed come from the request; everything else (segment root,
/// arena capacity) from `base`. Returns the path of the result blob.
pub fn serve_request<E>(
    dir: &Path,
    name: &str,
    base: &SweepConfig,
    evaluator: &E,
) -> XpResult<PathBuf>
where
    E: Evaluator + ?Sized,
{
    check_transfer_name(name)?;

    let bytes = match fs::read(dir.join(name)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(RemoteError::MissingRequest {
                name: name.to_string(),
            }
            .into())
        }
        Err(e) => return Err(e.into()),
    };
    let request = SweepRequest::from_bytes(&bytes)?;
    info!(
        request = %request.id,
        configurations = request.configurations.len(),
        datasets = request.datasets.len(),
        created_at = %request.created_at,
        "Serving sweep request"
    );

    let mut config = base.clone().with_pool_size(request.pool_size);
    config.seed = request.seed;
    let coordinator = ExperimentCoordinator::new(config)?;
    let results = coordinator.run_sweep(&request.datasets, &request.configurations, evaluator)?;

    let target = dir.join(result_name(name));
    fs::write(&target, encode_results(&results)?)?;
    info!(request = %request.id, path = %target.display(), "Wrote sweep results");
    Ok(target)
}
