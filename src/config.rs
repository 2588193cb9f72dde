//! Command-line and environment configuration of both binaries.
//!
//! Every option can be given as a flag or an environment variable. A
//! `config/.env` file, when present, is loaded into the environment first.

use crate::agent::compute::OperationDelays;
use crate::agent::pool::PoolConfig;
use crate::scheduler::sqlite::StoreConfig;

use clap::{Args, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_FILE: &str = "config/.env";

/// What happened to the env file. Loading runs before the subscriber is
/// installed (the file may set `RUST_LOG`), so the result is logged later
/// through [`EnvFile::report`].
#[derive(Debug)]
pub enum EnvFile {
    Loaded(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, dotenvy::Error),
}

impl EnvFile {
    pub fn report(&self) {
        match self {
            EnvFile::Loaded(path) => tracing::debug!("Loaded {}", path.display()),
            EnvFile::Missing(path) => tracing::debug!("No env file at {}", path.display()),
            EnvFile::Invalid(path, e) => tracing::warn!("Ignoring {}: {}", path.display(), e),
        }
    }
}

/// Loads `config/.env` if it exists. Variables already set are kept.
pub fn load_env_file() -> EnvFile {
    load_env_file_from(ENV_FILE)
}

pub fn load_env_file_from(path: impl Into<PathBuf>) -> EnvFile {
    let path = path.into();
    match dotenvy::from_path(&path) {
        Ok(()) => EnvFile::Loaded(path),
        Err(e) if e.not_found() => EnvFile::Missing(path),
        Err(e) => EnvFile::Invalid(path, e),
    }
}

/// Timing shared by every worker pool.
#[derive(Args, Debug, Clone)]
pub struct TimingArgs {
    /// Wait between worker iterations, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "TIME_ADDITION_MS", default_value_t = 100)]
    pub time_addition_ms: u64,

    #[arg(long, env = "TIME_SUBTRACTION_MS", default_value_t = 100)]
    pub time_subtraction_ms: u64,

    #[arg(long, env = "TIME_MULTIPLICATIONS_MS", default_value_t = 100)]
    pub time_multiplications_ms: u64,

    #[arg(long, env = "TIME_DIVISIONS_MS", default_value_t = 100)]
    pub time_divisions_ms: u64,
}

impl TimingArgs {
    pub fn delays(&self) -> OperationDelays {
        OperationDelays {
            addition: Duration::from_millis(self.time_addition_ms),
            subtraction: Duration::from_millis(self.time_subtraction_ms),
            multiplication: Duration::from_millis(self.time_multiplications_ms),
            division: Duration::from_millis(self.time_divisions_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Non-positive sizes run a single worker.
    pub fn pool_config(&self, computing_power: i64) -> PoolConfig {
        let pool_size = usize::try_from(computing_power).unwrap_or(0).max(1);
        PoolConfig::new(pool_size, self.poll_interval(), self.delays())
    }
}

/// Orchestrator: scheduler, worker protocol and expression API.
#[derive(Parser, Debug, Clone)]
#[command(name = "orchestrator", version, about)]
pub struct OrchestratorConfig {
    #[arg(long, env = "HTTP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// SQLite database file, or `:memory:`.
    #[arg(long, env = "DATABASE_PATH", default_value = "./db/calc.db")]
    pub database_path: PathBuf,

    /// Workers run inside the orchestrator process. 0 disables them.
    #[arg(long, env = "LOCAL_COMPUTING_POWER", default_value_t = 0)]
    pub local_computing_power: i64,

    /// Interval of the task statistics log line, in seconds.
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value_t = 30)]
    pub stats_interval_secs: u64,

    #[command(flatten)]
    pub timing: TimingArgs,
}

impl OrchestratorConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn store_config(&self) -> StoreConfig {
        if self.database_path.to_string_lossy() == ":memory:" {
            StoreConfig::in_memory()
        } else {
            StoreConfig::with_path(&self.database_path)
        }
    }

    /// `None` when the embedded pool is disabled.
    pub fn local_pool_config(&self) -> Option<PoolConfig> {
        (self.local_computing_power > 0)
            .then(|| self.timing.pool_config(self.local_computing_power))
    }
}

/// Agent: a worker pool against a remote orchestrator.
#[derive(Parser, Debug, Clone)]
#[command(name = "agent", version, about)]
pub struct AgentConfig {
    #[arg(long, env = "ORCHESTRATOR_URL", default_value = "http://127.0.0.1:8080")]
    pub orchestrator_url: String,

    /// Number of worker loops.
    #[arg(long, env = "COMPUTING_POWER", default_value_t = 5)]
    pub computing_power: i64,

    /// Timeout of one protocol request, in milliseconds.
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    #[command(flatten)]
    pub timing: TimingArgs,
}

impl AgentConfig {
    pub fn pool_config(&self) -> PoolConfig {
        self.timing.pool_config(self.computing_power)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
