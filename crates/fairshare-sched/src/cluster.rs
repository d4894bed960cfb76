//! In-process cluster: one coordinator task and N worker tasks on a
//! shared [`Mesh`].

use fairshare_core::ClusterConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::coordinator::{CoordinatorReport, CoordinatorSettings, run_coordinator};
use crate::error::{SchedError, SchedResult};
use crate::jobs::JobSource;
use crate::transport::Mesh;
use crate::worker::{WorkerReport, WorkerSettings, run_worker};

/// Reports gathered from every process once the run is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub coordinator: CoordinatorReport,
    /// Ordered by rank.
    pub workers: Vec<WorkerReport>,
}

pub struct Cluster {
    coordinator: JoinHandle<SchedResult<CoordinatorReport>>,
    workers: Vec<JoinHandle<SchedResult<WorkerReport>>>,
}

impl Cluster {
    /// Validate `config`, build the mesh, and spawn every process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch<S: JobSource + 'static>(
        config: &ClusterConfig,
        source: S,
        shutdown: watch::Receiver<bool>,
    ) -> SchedResult<Self> {
        config.validate()?;

        let mut endpoints = Mesh::build(config.workers + 1).into_iter();
        let coordinator_endpoint = endpoints.next().ok_or(SchedError::UnknownRank(0))?;

        let coordinator = tokio::spawn(run_coordinator(
            coordinator_endpoint,
            CoordinatorSettings::from_config(config),
            source,
            shutdown.clone(),
        ));

        let settings = WorkerSettings::from_config(config);
        let workers = endpoints
            .map(|endpoint| tokio::spawn(run_worker(endpoint, settings.clone(), shutdown.clone())))
            .collect();

        info!(
            workers = config.workers,
            rounds = config.rounds,
            slots = config.pools.slots,
            units = config.pools.units,
            "cluster launched"
        );
        Ok(Self {
            coordinator,
            workers,
        })
    }

    /// Wait for every process and collect their reports. The first
    /// failure, in rank order, is returned.
    pub async fn join(self) -> SchedResult<ClusterReport> {
        let coordinator = flatten(self.coordinator.await);
        let mut workers = Vec::with_capacity(self.workers.len());
        let mut failure = None;
        for handle in self.workers {
            match flatten(handle.await) {
                Ok(report) => workers.push(report),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        let coordinator = coordinator?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(ClusterReport {
            coordinator,
            workers,
        })
    }
}

fn flatten<T>(joined: Result<SchedResult<T>, tokio::task::JoinError>) -> SchedResult<T> {
    joined.map_err(|e| SchedError::Task(e.to_string()))?
}
