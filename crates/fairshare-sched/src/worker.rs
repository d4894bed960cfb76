//! Async worker driver.
//!
//! Runs one [`WorkerRound`] per job batch over an [`Endpoint`]:
//! receives, hands envelopes to the state machine, sends what it
//! returns, and sleeps through job execution while still receiving. While waiting with no
//! incoming traffic it logs a stall warning every `stall_warning`.

use std::time::Duration;

use fairshare_core::{COORDINATOR_RANK, ClusterConfig, Job, Pools, Rank, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{SchedError, SchedResult};
use crate::message::{Envelope, Payload};
use crate::round::{Phase, RoundOutcome, WorkerContext, WorkerRound};
use crate::transport::Endpoint;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of worker processes, ranks 1..=workers.
    pub workers: usize,
    pub rounds: u64,
    pub pools: Pools,
    /// Simulated execution time per unit of job demand.
    pub unit_duration: Duration,
    pub stall_warning: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            workers: config.workers,
            rounds: config.rounds,
            pools: config.pools,
            unit_duration: config.unit_duration(),
            stall_warning: config.stall_warning(),
        }
    }
}

/// Everything one worker did over the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub rank: Rank,
    pub rounds: Vec<RoundOutcome>,
    pub final_clock: Timestamp,
}

impl WorkerReport {
    pub fn jobs_run(&self) -> usize {
        self.rounds.iter().filter(|r| r.job.is_some()).count()
    }
}

/// Run a worker for `settings.rounds` rounds.
pub async fn run_worker(
    endpoint: Endpoint,
    settings: WorkerSettings,
    shutdown: watch::Receiver<bool>,
) -> SchedResult<WorkerReport> {
    let rank = endpoint.rank();
    let span = info_span!("worker", rank);
    Worker::new(endpoint, settings)
        .run(shutdown)
        .instrument(span)
        .await
}

struct Worker {
    endpoint: Endpoint,
    settings: WorkerSettings,
    ctx: WorkerContext,
}

impl Worker {
    fn new(endpoint: Endpoint, settings: WorkerSettings) -> Self {
        let workers = (1..=settings.workers).collect();
        let ctx = WorkerContext::new(endpoint.rank(), workers, settings.pools);
        Self {
            endpoint,
            settings,
            ctx,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SchedResult<WorkerReport> {
        info!(
            workers = self.settings.workers,
            rounds = self.settings.rounds,
            "worker started"
        );

        let mut rounds = Vec::new();
        for round in 0..self.settings.rounds {
            rounds.push(self.run_round(round, &mut shutdown).await?);
        }

        info!(clock = self.ctx.clock.current(), "worker finished");
        Ok(WorkerReport {
            rank: self.ctx.rank,
            rounds,
            final_clock: self.ctx.clock.current(),
        })
    }

    async fn run_round(
        &mut self,
        round: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SchedResult<RoundOutcome> {
        // Peers that received the batch first may already be bidding.
        let mut early = Vec::new();
        let jobs = loop {
            let envelope = self.next(round, "waiting for job batch", shutdown).await?;
            match envelope.payload {
                Payload::JobBatch(jobs) if envelope.from == COORDINATOR_RANK => {
                    self.ctx.clock.observe(envelope.timestamp);
                    break jobs;
                }
                Payload::JobBatch(_) => {
                    warn!(from = envelope.from, "job batch from a worker, discarding");
                }
                _ => early.push(envelope),
            }
        };
        debug!(
            round,
            jobs = jobs.len(),
            held_back = self.endpoint.held_back(),
            "job batch received"
        );

        let (mut state, out) = WorkerRound::begin(&mut self.ctx, round, jobs);
        self.endpoint.deliver_all(out)?;
        for envelope in early {
            self.dispatch(&mut state, envelope)?;
        }

        loop {
            match state.phase() {
                Phase::Finished => break,
                Phase::Executing => {
                    if let Some(job) = state.execution() {
                        self.execute(&mut state, job, shutdown).await?;
                    }
                    let out = state.finish_execution(&mut self.ctx);
                    self.endpoint.deliver_all(out)?;
                }
                phase => {
                    let waiting = phase.to_string();
                    let envelope = self.next(round, &waiting, shutdown).await?;
                    self.dispatch(&mut state, envelope)?;
                }
            }
        }

        Ok(state.outcome(&self.ctx))
    }

    fn dispatch(&mut self, state: &mut WorkerRound, envelope: Envelope) -> SchedResult<()> {
        let from = envelope.from;
        let tag = envelope.tag();
        match state.handle(&mut self.ctx, envelope) {
            Ok(out) => self.endpoint.deliver_all(out),
            Err(violation) => {
                warn!(from, %tag, %violation, "discarding message");
                Ok(())
            }
        }
    }

    /// Sleep through the job while still applying the round's swaps and
    /// completions to the allocation queue.
    async fn execute(
        &mut self,
        state: &mut WorkerRound,
        job: Job,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SchedResult<()> {
        let units = u32::try_from(job.demand).unwrap_or(u32::MAX);
        let duration = self.settings.unit_duration.saturating_mul(units);
        debug!(job_id = job.id, demand = job.demand, ?duration, "executing job");

        let work = tokio::time::sleep(duration);
        tokio::pin!(work);
        loop {
            tokio::select! {
                _ = &mut work => return Ok(()),
                received = self.endpoint.recv_round(state.round()) => {
                    self.dispatch(state, received?)?;
                }
                _ = shutdown.changed() => {
                    return Err(SchedError::Cancelled(format!("executing job {}", job.id)));
                }
            }
        }
    }

    /// Receive the next envelope of `round`, warning while stalled.
    async fn next(
        &mut self,
        round: u64,
        waiting: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SchedResult<Envelope> {
        let stall_warning = self.settings.stall_warning;
        let mut stalled = Duration::ZERO;
        loop {
            tokio::select! {
                received = self.endpoint.recv_round(round) => return received,
                _ = tokio::time::sleep(stall_warning) => {
                    stalled += stall_warning;
                    warn!(
                        round,
                        waiting,
                        stalled_secs = stalled.as_secs_f64(),
                        clock = self.ctx.clock.current(),
                        "no progress"
                    );
                }
                _ = shutdown.changed() => {
                    return Err(SchedError::Cancelled(waiting.to_string()));
                }
            }
        }
    }
}
