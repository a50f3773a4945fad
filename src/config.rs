//! Workload harness configuration.
//!
//! The locking semantics themselves are fixed by the spec (wound-wait 2PL is
//! not a tunable); what's configurable is the shape of the synthetic workload
//! the CLI binary drives against the lock manager.

use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Diagnostic log verbosity for the `lockbench` binary, mirroring the levels
/// the `log` facade defines. Kept as its own enum (rather than a bare
/// `LevelFilter`, which does not derive `Serialize`/`Deserialize`) so
/// [`WorkloadConfig`] stays round-trippable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogVerbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogVerbosity {
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            LogVerbosity::Error => LevelFilter::Error,
            LogVerbosity::Warn => LevelFilter::Warn,
            LogVerbosity::Info => LevelFilter::Info,
            LogVerbosity::Debug => LevelFilter::Debug,
            LogVerbosity::Trace => LevelFilter::Trace,
        }
    }
}

impl std::str::FromStr for LogVerbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogVerbosity::Error),
            "warn" => Ok(LogVerbosity::Warn),
            "info" => Ok(LogVerbosity::Info),
            "debug" => Ok(LogVerbosity::Debug),
            "trace" => Ok(LogVerbosity::Trace),
            other => Err(format!("unrecognized log level {other:?} (expected error|warn|info|debug|trace)")),
        }
    }
}

/// Configuration for the `lockbench` workload harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of concurrent worker threads.
    pub workers: usize,

    /// Number of transactions each worker runs.
    pub txns_per_worker: usize,

    /// Size of the RID space transactions draw from (RIDs are `0..table_size`).
    pub table_size: u64,

    /// Diagnostic log verbosity, applied to the `log` crate's max level.
    pub log_level: LogVerbosity,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            txns_per_worker: 10_000,
            table_size: 100_000,
            log_level: LogVerbosity::Info,
        }
    }
}

impl WorkloadConfig {
    /// A small configuration suitable for quick smoke runs and doctests.
    pub fn smoke() -> Self {
        Self {
            workers: 4,
            txns_per_worker: 200,
            table_size: 1_000,
            log_level: LogVerbosity::Info,
        }
    }

    /// Total number of transactions the workload will run.
    pub fn total_txns(&self) -> usize {
        self.workers * self.txns_per_worker
    }
}
