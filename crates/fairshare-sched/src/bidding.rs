//! Job bidding queue.
//!
//! Every worker collects one bid from each worker (itself included).
//! Once all N bids are in, the sorted order is the same at every peer,
//! so each worker can tell locally whether it won and which job is its.

use fairshare_core::{BidEntry, Job, Rank};

use crate::error::ProtocolViolation;
use crate::message::Tag;

#[derive(Debug, Clone)]
pub struct BiddingQueue {
    expected: usize,
    entries: Vec<BidEntry>,
}

/// A worker's result once bidding closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Position in the ranking and the job at the same index of the batch.
    Won { position: usize, job: Job },
    Lost { position: usize },
}

impl BiddingQueue {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            entries: Vec::with_capacity(expected),
        }
    }

    pub fn insert(&mut self, entry: BidEntry) -> Result<(), ProtocolViolation> {
        if self.entries.iter().any(|e| e.rank == entry.rank) {
            return Err(ProtocolViolation::Duplicate {
                tag: Tag::Bid,
                from: entry.rank,
            });
        }
        if self.is_complete() {
            return Err(ProtocolViolation::QueueClosed {
                tag: Tag::Bid,
                from: entry.rank,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.len() == self.expected
    }

    /// Bids in priority order. Meaningful once the queue is complete.
    pub fn ranking(&self) -> Vec<BidEntry> {
        let mut ranking = self.entries.clone();
        ranking.sort();
        ranking
    }

    /// Ranks that win one job each: the first `min(jobs, bids)` entries.
    pub fn winners(&self, job_count: usize) -> Vec<Rank> {
        self.ranking()
            .into_iter()
            .take(job_count)
            .map(|e| e.rank)
            .collect()
    }

    /// Outcome for `rank`. `None` while bids are still missing or if
    /// `rank` never bid.
    pub fn assignment(&self, rank: Rank, jobs: &[Job]) -> Option<Assignment> {
        if !self.is_complete() {
            return None;
        }
        let position = self.ranking().iter().position(|e| e.rank == rank)?;
        Some(match jobs.get(position) {
            Some(&job) => Assignment::Won { position, job },
            None => Assignment::Lost { position },
        })
    }
}
