//! Sweep configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use xp_shared::{default_segment_root, SharedArena};
use xp_types::{config_error, XpResult};

pub const ENV_POOL_SIZE: &str = "XP_POOL_SIZE";
pub const ENV_SEED: &str = "XP_SEED";
pub const ENV_SHM_DIR: &str = "XP_SHM_DIR";
pub const ENV_ARENA_CAPACITY: &str = "XP_ARENA_CAPACITY";

/// Settings shared by every sweep a coordinator runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Number of worker threads.
    pub pool_size: usize,

    /// Seed passed unchanged to every evaluator call.
    pub seed: Option<u64>,

    /// Directory holding shared segments. `None` uses `/dev/shm` when present.
    pub shm_root: Option<PathBuf>,

    /// Upper bound on bytes published at once. `None` = unlimited.
    pub arena_capacity_bytes: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            seed: None,
            shm_root: None,
            arena_capacity_bytes: None,
        }
    }
}

impl SweepConfig {
    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_shm_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shm_root = Some(root.into());
        self
    }

    pub fn with_arena_capacity(mut self, bytes: u64) -> Self {
        self.arena_capacity_bytes = Some(bytes);
        self
    }

    /// Defaults overridden by `XP_POOL_SIZE`, `XP_SEED`, `XP_SHM_DIR` and
    /// `XP_ARENA_CAPACITY`.
    pub fn from_env() -> XpResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> XpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_POOL_SIZE) {
            config.pool_size = parse(ENV_POOL_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SEED) {
            config.seed = Some(parse(ENV_SEED, &raw)?);
        }
        if let Some(raw) = lookup(ENV_SHM_DIR) {
            if raw.trim().is_empty() {
                return Err(config_error!("{} is set but empty", ENV_SHM_DIR));
            }
            config.shm_root = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup(ENV_ARENA_CAPACITY) {
            config.arena_capacity_bytes = Some(parse(ENV_ARENA_CAPACITY, &raw)?);
        }

        Ok(config)
    }

    pub fn segment_root(&self) -> PathBuf {
        self.shm_root.clone().unwrap_or_else(default_segment_root)
    }

    /// Open the arena described by this configuration.
    pub fn arena(&self) -> XpResult<SharedArena> {
        match self.arena_capacity_bytes {
            Some(capacity) => SharedArena::with_capacity(self.segment_root(), capacity),
            None => SharedArena::new(self.segment_root()),
        }
    }
}

fn parse<T>(key: &str, raw: &str) -> XpResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| config_error!("invalid {key}={raw:?}: {e}"))
}
