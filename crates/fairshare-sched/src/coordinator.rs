//! Coordinator: publishes job batches and waits for their completion.
//!
//! The coordinator takes no part in bidding or allocation. Each round
//! it multicasts one JOB_BATCH and then collects a JOB_COMPLETE for
//! every job in it before moving on.

use std::collections::BTreeSet;
use std::time::Duration;

use fairshare_core::{COORDINATOR_RANK, ClusterConfig, Job, JobId, LamportClock, Rank};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{ProtocolViolation, SchedError, SchedResult};
use crate::jobs::JobSource;
use crate::message::{Envelope, Outgoing, Payload};
use crate::transport::Endpoint;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub workers: usize,
    pub rounds: u64,
    pub stall_warning: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            workers: config.workers,
            rounds: config.rounds,
            stall_warning: config.stall_warning(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub job_id: JobId,
    pub rank: Rank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u64,
    pub jobs: Vec<Job>,
    /// In arrival order.
    pub completions: Vec<Completion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorReport {
    pub rounds: Vec<RoundSummary>,
}

impl CoordinatorReport {
    pub fn jobs_published(&self) -> usize {
        self.rounds.iter().map(|r| r.jobs.len()).sum()
    }
}

/// Coordinator protocol state, free of I/O.
#[derive(Debug)]
pub struct Coordinator {
    workers: usize,
    clock: LamportClock,
    next_job_id: JobId,
    outstanding: BTreeSet<JobId>,
    current: Option<RoundSummary>,
}

impl Coordinator {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            clock: LamportClock::new(),
            next_job_id: 0,
            outstanding: BTreeSet::new(),
            current: None,
        }
    }

    /// Turn a batch of demands into jobs with fresh ids and address the
    /// JOB_BATCH to every worker.
    pub fn publish(&mut self, round: u64, mut demands: Vec<u64>) -> Outgoing {
        if demands.len() > self.workers {
            warn!(
                round,
                requested = demands.len(),
                workers = self.workers,
                "batch larger than worker count, truncating"
            );
            demands.truncate(self.workers);
        }

        let jobs: Vec<Job> = demands
            .into_iter()
            .enumerate()
            .map(|(i, demand)| Job {
                id: self.next_job_id + i as u64,
                demand,
            })
            .collect();
        self.next_job_id += jobs.len() as u64;
        self.outstanding = jobs.iter().map(|j| j.id).collect();
        self.current = Some(RoundSummary {
            round,
            jobs: jobs.clone(),
            completions: Vec::new(),
        });

        let timestamp = self.clock.tick();
        info!(
            round,
            jobs = jobs.len(),
            demands = ?jobs.iter().map(|j| j.demand).collect::<Vec<_>>(),
            clock = timestamp,
            "publishing job batch"
        );
        Outgoing::multicast(
            (1..=self.workers).collect(),
            Envelope {
                from: COORDINATOR_RANK,
                round,
                timestamp,
                payload: Payload::JobBatch(jobs),
            },
        )
    }

    /// Record one received envelope. Only JOB_COMPLETE is expected.
    pub fn record(&mut self, envelope: Envelope) -> Result<(), ProtocolViolation> {
        self.clock.observe(envelope.timestamp);
        let from = envelope.from;
        let tag = envelope.tag();

        let Payload::JobComplete(job_id) = envelope.payload else {
            return Err(ProtocolViolation::Unexpected { tag, from });
        };
        let Some(summary) = self.current.as_mut() else {
            return Err(ProtocolViolation::Unexpected { tag, from });
        };
        if !summary.jobs.iter().any(|j| j.id == job_id) {
            return Err(ProtocolViolation::UnknownJob { tag, from, job_id });
        }
        if !self.outstanding.remove(&job_id) {
            return Err(ProtocolViolation::Duplicate { tag, from });
        }

        summary.completions.push(Completion { job_id, rank: from });
        debug!(
            job_id,
            rank = from,
            outstanding = self.outstanding.len(),
            "job completion recorded"
        );
        Ok(())
    }

    pub fn round_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Close the current round and hand back its summary.
    pub fn finish_round(&mut self) -> Option<RoundSummary> {
        self.current.take()
    }
}

/// Publish `settings.rounds` batches from `source`, waiting for every
/// job of a batch to complete before the next.
pub async fn run_coordinator<S: JobSource>(
    endpoint: Endpoint,
    settings: CoordinatorSettings,
    source: S,
    shutdown: watch::Receiver<bool>,
) -> SchedResult<CoordinatorReport> {
    let rank = endpoint.rank();
    drive(endpoint, settings, source, shutdown)
        .instrument(info_span!("coordinator", rank))
        .await
}

async fn drive<S: JobSource>(
    mut endpoint: Endpoint,
    settings: CoordinatorSettings,
    mut source: S,
    mut shutdown: watch::Receiver<bool>,
) -> SchedResult<CoordinatorReport> {
    info!(
        workers = settings.workers,
        rounds = settings.rounds,
        "coordinator started"
    );
    let mut coordinator = Coordinator::new(settings.workers);
    let mut report = CoordinatorReport::default();

    for round in 0..settings.rounds {
        let demands = source.next_batch(round, settings.workers);
        endpoint.deliver(coordinator.publish(round, demands))?;

        let mut stalled = Duration::ZERO;
        while !coordinator.round_complete() {
            tokio::select! {
                received = endpoint.recv_round(round) => {
                    stalled = Duration::ZERO;
                    if let Err(violation) = coordinator.record(received?) {
                        warn!(round, %violation, "discarding message");
                    }
                }
                _ = tokio::time::sleep(settings.stall_warning) => {
                    stalled += settings.stall_warning;
                    warn!(
                        round,
                        outstanding = coordinator.outstanding(),
                        stalled_secs = stalled.as_secs_f64(),
                        "no progress waiting for completions"
                    );
                }
                _ = shutdown.changed() => {
                    return Err(SchedError::Cancelled(format!(
                        "waiting for round {round} completions"
                    )));
                }
            }
        }

        if let Some(summary) = coordinator.finish_round() {
            info!(round, jobs = summary.jobs.len(), "round complete");
            report.rounds.push(summary);
        }
    }

    info!(jobs = report.jobs_published(), "coordinator finished");
    Ok(report)
}
