//! Simulation mode: the coordinator and every worker as tasks in this
//! process.
//!
//! In this mode, the daemon:
//! 1. Builds the in-process mesh and spawns all processes
//! 2. Feeds the coordinator random batches from the configured ranges
//! 3. Cancels every process on Ctrl-C
//! 4. Prints a per-round summary once the run is over

use std::fmt::Write as _;
use std::future::Future;
use std::io;

use clap::ValueEnum;
use fairshare_core::ClusterConfig;
use fairshare_sched::{Cluster, ClusterReport, RandomJobSource};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Run the cluster to completion and print its report.
pub async fn run_simulation(config: &ClusterConfig, output: OutputFormat) -> anyhow::Result<()> {
    info!(
        workers = config.workers,
        rounds = config.rounds,
        slots = config.pools.slots,
        units = config.pools.units,
        seed = ?config.jobs.seed,
        "fairshare simulation starting"
    );

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_rx, signal_handle) = shutdown_on(tokio::signal::ctrl_c());

    // ── Cluster ──────────────────────────────────────────────────
    let cluster = Cluster::launch(config, RandomJobSource::from_config(config), shutdown_rx)?;
    let result = cluster.join().await;
    signal_handle.abort();
    let report = result?;

    match output {
        OutputFormat::Table => print!("{}", render_table(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    info!("simulation finished");
    Ok(())
}

/// Flip the returned receiver once `signal` fires. If the signal cannot
/// be listened for, the sender stays alive so the run is never cancelled.
fn shutdown_on<F>(signal: F) -> (watch::Receiver<bool>, JoinHandle<()>)
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for ctrl-c, run is not interruptible");
                // A dropped sender reads as a shutdown to every process.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });
    (shutdown_rx, handle)
}

/// One block per round: the batch, then each worker's outcome.
pub fn render_table(report: &ClusterReport) -> String {
    let mut out = String::new();
    for summary in &report.coordinator.rounds {
        let jobs: Vec<String> = summary
            .jobs
            .iter()
            .map(|j| format!("{}:{}", j.id, j.demand))
            .collect();
        let _ = writeln!(out, "round {}  jobs [{}]", summary.round, jobs.join(", "));
        let _ = writeln!(
            out,
            "  {:<6} {:<8} {:<8} {:<6} {:<6} {:<6} {:<6}",
            "rank", "job", "demand", "bid", "queue", "swaps", "hunger"
        );

        for worker in &report.workers {
            let Some(outcome) = worker.rounds.iter().find(|r| r.round == summary.round) else {
                continue;
            };
            let dash = || "-".to_string();
            let _ = writeln!(
                out,
                "  {:<6} {:<8} {:<8} {:<6} {:<6} {:<6} {:<6}",
                worker.rank,
                outcome.job.map(|j| j.id.to_string()).unwrap_or_else(dash),
                outcome.job.map(|j| j.demand.to_string()).unwrap_or_else(dash),
                outcome.bid_position.map(|p| p.to_string()).unwrap_or_else(dash),
                outcome
                    .allocation_position
                    .map(|p| p.to_string())
                    .unwrap_or_else(dash),
                outcome.swaps,
                outcome.hunger,
            );
        }

        let order: Vec<String> = summary
            .completions
            .iter()
            .map(|c| format!("{}@{}", c.job_id, c.rank))
            .collect();
        let _ = writeln!(out, "  completed [{}]", order.join(", "));
    }
    out
}
