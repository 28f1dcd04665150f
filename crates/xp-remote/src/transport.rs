//! Moving request and result blobs to and from a runner.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

use xp_sweep::{Evaluator, SweepConfig};
use xp_types::{RemoteError, XpResult};

use crate::request::check_transfer_name;
use crate::runner::serve_request;

/// How blobs reach the runner and how the runner is started.
///
/// Names are plain file names; where the runner keeps them is the
/// transport's business.
pub trait Transport: Send + Sync {
    fn is_ready(&self) -> bool;

    fn send_file(&self, source: &Path, target_name: &str) -> XpResult<()>;

    /// Run the sweep stored under `name`; on success the runner has written
    /// `result_<name>`.
    fn invoke_runner(&self, name: &str) -> XpResult<()>;

    fn retrieve_file(&self, name: &str, target: &Path) -> XpResult<()>;
}

/// Configuration for [`ScriptTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptTransportConfig {
    /// Program to run, e.g. an ssh wrapper script.
    pub program: PathBuf,

    /// Arguments placed before the sub-command.
    pub leading_args: Vec<String>,

    /// Address of the runner, exported as `INSTANCE_IP`.
    pub target_ip: String,

    /// Extra environment for every invocation.
    pub env_vars: HashMap<String, String>,
}

impl Default for ScriptTransportConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./ec2-ssh-interface.sh"),
            leading_args: Vec::new(),
            target_ip: "127.0.0.1".to_string(),
            env_vars: HashMap::new(),
        }
    }
}

/// Drives an external interface program with the sub-commands `is-ready`,
/// `send-file <source> <name>`, `retrieve-file <name> <target>` and
/// `run-with-file <name>`.
#[derive(Debug, Clone)]
pub struct ScriptTransport {
    config: ScriptTransportConfig,
}

impl ScriptTransport {
    pub fn new(config: ScriptTransportConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.leading_args)
            .args(args)
            .env("INSTANCE_IP", &self.config.target_ip)
            .envs(&self.config.env_vars);
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = vec![self.config.program.display().to_string()];
        parts.extend(self.config.leading_args.iter().cloned());
        parts.extend(args.iter().map(|a| a.to_string()));
        parts.join(" ")
    }

    fn run(&self, args: &[&str]) -> XpResult<()> {
        debug!(command = %self.describe(args), "Running transport command");
        let status = self.command(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(RemoteError::CommandFailed {
                command: self.describe(args),
                status: status.to_string(),
            }
            .into())
        }
    }
}

impl Transport for ScriptTransport {
    fn is_ready(&self) -> bool {
        match self.command(&["is-ready"]).status() {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(error = %e, "Readiness probe could not run");
                false
            }
        }
    }

    fn send_file(&self, source: &Path, target_name: &str) -> XpResult<()> {
        check_transfer_name(target_name)?;
        let source = source.display().to_string();
        self.run(&["send-file", source.as_str(), target_name])
    }

    fn invoke_runner(&self, name: &str) -> XpResult<()> {
        check_transfer_name(name)?;
        self.run(&["run-with-file", name])
    }

    fn retrieve_file(&self, name: &str, target: &Path) -> XpResult<()> {
        check_transfer_name(name)?;
        let target = target.display().to_string();
        self.run(&["retrieve-file", name, target.as_str()])
    }
}

/// Runs the runner in this process against a local exchange directory.
pub struct LocalTransport<E: ?Sized> {
    dir: PathBuf,
    base: SweepConfig,
    evaluator: Arc<E>,
}

impl<E: Evaluator + ?Sized> LocalTransport<E> {
    pub fn new(dir: impl Into<PathBuf>, base: SweepConfig, evaluator: Arc<E>) -> XpResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            base,
            evaluator,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<E: Evaluator + ?Sized> Transport for LocalTransport<E> {
    fn is_ready(&self) -> bool {
        self.dir.is_dir()
    }

    fn send_file(&self, source: &Path, target_name: &str) -> XpResult<()> {
        check_transfer_name(target_name)?;
        fs::copy(source, self.dir.join(target_name))?;
        Ok(())
    }

    fn invoke_runner(&self, name: &str) -> XpResult<()> {
        info!(name, "Invoking local runner");
        serve_request(&self.dir, name, &self.base, &*self.evaluator)?;
        Ok(())
    }

    fn retrieve_file(&self, name: &str, target: &Path) -> XpResult<()> {
        check_transfer_name(name)?;
        let source = self.dir.join(name);
        if !source.is_file() {
            return Err(RemoteError::MissingResult {
                name: name.to_string(),
            }
            .into());
        }
        fs::copy(source, target)?;
        Ok(())
    }
}
