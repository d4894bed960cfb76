//! Value types exchanged by the admission protocol.
//!
//! Two orderings live here and every peer must apply them identically:
//!
//! ```text
//! BidEntry         hunger desc, timestamp asc, rank asc
//! AllocationEntry  timestamp asc, rank asc
//! ```
//!
//! A job at allocation position `p` may start when
//!
//! ```text
//! slots held ahead of p            < pools.slots
//! units held ahead of p + demand   < pools.units
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Process identity. The coordinator is rank 0, workers are 1..=N.
pub type Rank = usize;

/// Job identifier, unique across the whole run.
pub type JobId = u64;

/// Lamport clock reading.
pub type Timestamp = u64;

/// Rank of the process that publishes job batches.
pub const COORDINATOR_RANK: Rank = 0;

/// A unit of work published by the coordinator.
///
/// `demand` is both the number of pool-T units the job reserves while it
/// runs and its simulated duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub demand: u64,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} (demand {})", self.id, self.demand)
    }
}

// ── Bidding ────────────────────────────────────────────────────

/// A worker's claim in the job-bidding phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub timestamp: Timestamp,
    /// Consecutive rounds the bidder has gone without a job.
    pub hunger: u32,
}

/// A bid together with the rank that placed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidEntry {
    pub rank: Rank,
    pub bid: Bid,
}

impl BidEntry {
    pub fn new(rank: Rank, bid: Bid) -> Self {
        Self { rank, bid }
    }
}

impl Ord for BidEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bid
            .hunger
            .cmp(&self.bid.hunger)
            .then(self.bid.timestamp.cmp(&other.bid.timestamp))
            .then(self.rank.cmp(&other.rank))
    }
}

impl PartialOrd for BidEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Resource allocation ────────────────────────────────────────

/// A bidding winner's request for a place in the allocation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub timestamp: Timestamp,
    pub job_id: JobId,
}

/// A resource request together with the rank that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub rank: Rank,
    pub request: ResourceRequest,
}

impl AllocationEntry {
    pub fn new(rank: Rank, request: ResourceRequest) -> Self {
        Self { rank, request }
    }

    pub fn job_id(&self) -> JobId {
        self.request.job_id
    }
}

impl Ord for AllocationEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .timestamp
            .cmp(&other.request.timestamp)
            .then(self.rank.cmp(&other.rank))
            .then(self.request.job_id.cmp(&other.request.job_id))
    }
}

impl PartialOrd for AllocationEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exchange of two allocation queue positions.
///
/// The delegating worker is blocked and gives up its earlier position;
/// the delegated worker is promoted into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub delegating_rank: Rank,
    pub delegated_rank: Rank,
}

// ── Pools ──────────────────────────────────────────────────────

/// Totals of the two shared resource pools.
///
/// `slots` (pool A) is consumed one per running job, `units` (pool T)
/// is consumed by job demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pools {
    pub slots: u64,
    pub units: u64,
}

impl Default for Pools {
    fn default() -> Self {
        Self {
            slots: 5,
            units: 30,
        }
    }
}

/// What the jobs queued ahead of a worker still hold or will hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Needs {
    pub slots: u64,
    pub units: u64,
}

impl Needs {
    /// Admission check for a job of `demand` queued behind these needs.
    ///
    /// Both comparisons are strict: a slot must remain free ahead of the
    /// job, and pool T must keep headroom after the job's own demand.
    pub fn fits(&self, demand: u64, pools: Pools) -> bool {
        self.slots < pools.slots && self.units.saturating_add(demand) < pools.units
    }

    /// Units of pool T left over by the jobs ahead.
    pub fn room(&self, pools: Pools) -> u64 {
        pools.units.saturating_sub(self.units)
    }
}

impl fmt::Display for Needs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} slots / {} units", self.slots, self.units)
    }
}
