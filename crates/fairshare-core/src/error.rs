//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors detected at startup, before any process sends a message.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("cluster needs at least one worker")]
    NoWorkers,

    #[error("rounds must be at least 1")]
    NoRounds,

    #[error("pool {0} is empty")]
    EmptyPool(&'static str),

    #[error("invalid demand range {min}..={max}")]
    DemandRange { min: u64, max: u64 },

    #[error("max demand {max} leaves no headroom in a pool of {units} units")]
    DemandExceedsPool { max: u64, units: u64 },

    #[error("invalid batch range {min}..={max} for {workers} workers")]
    BatchRange {
        min: usize,
        max: usize,
        workers: usize,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
