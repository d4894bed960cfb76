//! fairshare.toml cluster configuration.
//!
//! ```toml
//! workers = 4
//! rounds = 3
//!
//! [pools]
//! slots = 5
//! units = 30
//!
//! [jobs]
//! min_demand = 10
//! max_demand = 20
//! seed = 7
//!
//! [execution]
//! unit_millis = 100
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Pools;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of worker processes (ranks 1..=workers).
    pub workers: usize,
    pub rounds: u64,
    pub pools: Pools,
    pub jobs: JobsConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub min_demand: u64,
    pub max_demand: u64,
    pub min_batch: usize,
    /// Defaults to the worker count and is clamped to it.
    pub max_batch: Option<usize>,
    /// Seed for reproducible batches. Entropy-seeded when absent.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Simulated work per unit of job demand.
    pub unit_millis: u64,
    /// How long a blocked process waits before logging a stall warning.
    pub stall_warning_millis: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rounds: 1,
            pools: Pools::default(),
            jobs: JobsConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            min_demand: 10,
            max_demand: 20,
            min_batch: 1,
            max_batch: None,
            seed: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            unit_millis: 100,
            stall_warning_millis: 5_000,
        }
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.rounds == 0 {
            return Err(ConfigError::NoRounds);
        }
        if self.pools.slots == 0 {
            return Err(ConfigError::EmptyPool("slots"));
        }
        if self.pools.units == 0 {
            return Err(ConfigError::EmptyPool("units"));
        }
        if self.jobs.min_demand == 0 || self.jobs.min_demand > self.jobs.max_demand {
            return Err(ConfigError::DemandRange {
                min: self.jobs.min_demand,
                max: self.jobs.max_demand,
            });
        }
        if self.jobs.max_demand >= self.pools.units {
            return Err(ConfigError::DemandExceedsPool {
                max: self.jobs.max_demand,
                units: self.pools.units,
            });
        }
        let batch = self.batch_range();
        if *batch.start() == 0 || batch.start() > batch.end() {
            return Err(ConfigError::BatchRange {
                min: *batch.start(),
                max: *batch.end(),
                workers: self.workers,
            });
        }
        Ok(())
    }

    pub fn demand_range(&self) -> RangeInclusive<u64> {
        self.jobs.min_demand..=self.jobs.max_demand
    }

    /// Batch size bounds with `max_batch` clamped to the worker count.
    pub fn batch_range(&self) -> RangeInclusive<usize> {
        let max = self.jobs.max_batch.unwrap_or(self.workers).min(self.workers);
        self.jobs.min_batch..=max
    }

    pub fn unit_duration(&self) -> Duration {
        Duration::from_millis(self.execution.unit_millis)
    }

    pub fn stall_warning(&self) -> Duration {
        Duration::from_millis(self.execution.stall_warning_millis)
    }

    /// Worker ranks, 1..=workers.
    pub fn worker_ranks(&self) -> Vec<crate::Rank> {
        (1..=self.workers).collect()
    }
}
