//! fairshare-core — protocol value types, the Lamport clock, and
//! cluster configuration shared by the scheduler engine and the daemon.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::LamportClock;
pub use config::{ClusterConfig, ExecutionConfig, JobsConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
