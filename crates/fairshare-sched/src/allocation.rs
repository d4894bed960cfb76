//! Resource allocation queue.
//!
//! Bidding winners order themselves by their RESOURCE_REQUEST clocks.
//! A winner may start its job once the jobs queued ahead of it leave
//! room in both pools:
//!
//! ```text
//! position:  0      1      2      3 (me)
//! demand:    7      4*     9
//!            └──── ahead ────┘
//! needs = { slots: 2, units: 16 }        (* completed, counts as 0)
//! admitted iff needs.slots < pools.slots
//!          && needs.units + my demand < pools.units
//! ```
//!
//! Entries are never removed. Completed jobs stay in place with zero
//! demand so that positions remain stable for swaps. `needs` is kept
//! incrementally; [`AllocationQueue::recompute`] derives it from scratch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;

use fairshare_core::{AllocationEntry, Job, JobId, Needs, Pools, Rank, SwapRequest};
use tracing::{debug, warn};

use crate::error::ProtocolViolation;
use crate::message::Tag;

#[derive(Debug, Clone)]
pub struct AllocationQueue {
    me: Rank,
    expected: usize,
    demands: HashMap<JobId, u64>,
    entries: Vec<AllocationEntry>,
    complete: bool,
    completed: HashSet<JobId>,
    admitted: HashSet<Rank>,
    deferred_swaps: VecDeque<SwapRequest>,
    needs: Needs,
}

/// Result of [`AllocationQueue::apply_swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Queue still incomplete; replayed once the last request arrives.
    Deferred,
    /// Positions of the delegating and delegated entries before the swap.
    Applied { delegating: usize, delegated: usize },
}

impl AllocationQueue {
    /// Queue for `me`, seeded with its own request. `expected` is the
    /// number of winners; `batch` supplies job demands.
    pub fn new(me: Rank, own: AllocationEntry, expected: usize, batch: &[Job]) -> Self {
        let mut queue = Self {
            me,
            expected,
            demands: batch.iter().map(|j| (j.id, j.demand)).collect(),
            entries: Vec::with_capacity(expected),
            complete: false,
            completed: HashSet::new(),
            admitted: HashSet::new(),
            deferred_swaps: VecDeque::new(),
            needs: Needs::default(),
        };
        queue.entries.push(own);
        if queue.entries.len() >= queue.expected {
            queue.close();
        }
        queue
    }

    /// Add a peer's request. Returns `true` when this request completes
    /// the queue.
    pub fn insert(&mut self, entry: AllocationEntry) -> Result<bool, ProtocolViolation> {
        let from = entry.rank;
        if self.complete {
            return Err(ProtocolViolation::QueueClosed {
                tag: Tag::ResourceRequest,
                from,
            });
        }
        if self.entries.iter().any(|e| e.rank == from) {
            return Err(ProtocolViolation::Duplicate {
                tag: Tag::ResourceRequest,
                from,
            });
        }
        if !self.demands.contains_key(&entry.job_id()) {
            return Err(ProtocolViolation::UnknownJob {
                tag: Tag::ResourceRequest,
                from,
                job_id: entry.job_id(),
            });
        }

        self.entries.push(entry);
        if self.entries.len() == self.expected {
            self.close();
            return Ok(true);
        }
        Ok(false)
    }

    fn close(&mut self) {
        self.entries.sort();
        self.complete = true;
        self.needs = self.recompute().unwrap_or_default();
        debug!(
            rank = self.me,
            position = ?self.position(self.me),
            slots_needed = self.needs.slots,
            units_needed = self.needs.units,
            "allocation queue complete"
        );

        while let Some(swap) = self.deferred_swaps.pop_front() {
            if let Err(violation) = self.apply_swap(swap) {
                warn!(rank = self.me, %violation, "dropping deferred swap");
            }
        }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn entries(&self) -> &[AllocationEntry] {
        &self.entries
    }

    pub fn position(&self, rank: Rank) -> Option<usize> {
        self.entries.iter().position(|e| e.rank == rank)
    }

    pub fn my_position(&self) -> Option<usize> {
        self.position(self.me)
    }

    pub fn is_last(&self) -> bool {
        self.my_position() == Some(self.entries.len().saturating_sub(1))
    }

    pub fn demand_of(&self, rank: Rank) -> Option<u64> {
        let entry = self.entries.iter().find(|e| e.rank == rank)?;
        self.demands.get(&entry.job_id()).copied()
    }

    pub fn my_demand(&self) -> Option<u64> {
        self.demand_of(self.me)
    }

    pub fn is_admitted(&self, rank: Rank) -> bool {
        self.admitted.contains(&rank)
    }

    pub fn is_job_completed(&self, job_id: JobId) -> bool {
        self.completed.contains(&job_id)
    }

    /// Neither admitted nor finished.
    pub fn is_pending(&self, rank: Rank) -> bool {
        match self.entries.iter().find(|e| e.rank == rank) {
            Some(entry) => !self.is_admitted(rank) && !self.is_job_completed(entry.job_id()),
            None => false,
        }
    }

    /// Demand an entry still holds or will hold; zero once completed.
    fn effective(&self, entry: &AllocationEntry) -> u64 {
        if self.completed.contains(&entry.job_id()) {
            0
        } else {
            self.demands.get(&entry.job_id()).copied().unwrap_or(0)
        }
    }

    fn holds_slot(&self, entry: &AllocationEntry) -> bool {
        !self.completed.contains(&entry.job_id())
    }

    /// Slots and units held by the entries at `positions`.
    fn held_by(&self, positions: RangeInclusive<usize>) -> Needs {
        self.entries[positions]
            .iter()
            .filter(|e| self.holds_slot(e))
            .fold(Needs::default(), |needs, e| Needs {
                slots: needs.slots + 1,
                units: needs.units + self.effective(e),
            })
    }

    /// Cached needs. `None` until the queue is complete.
    pub fn needs(&self) -> Option<Needs> {
        self.complete.then_some(self.needs)
    }

    /// Needs of `rank`'s entry, derived from the current order and
    /// completion set. `None` until the queue is complete.
    pub fn needs_of(&self, rank: Rank) -> Option<Needs> {
        if !self.complete {
            return None;
        }
        match self.position(rank)? {
            0 => Some(Needs::default()),
            position => Some(self.held_by(0..=position - 1)),
        }
    }

    /// Needs of `me`, derived from scratch.
    pub fn recompute(&self) -> Option<Needs> {
        self.needs_of(self.me)
    }

    /// Whether `me` may start its job now.
    pub fn is_admissible(&self, pools: Pools) -> bool {
        self.complete
            && self
                .my_demand()
                .is_some_and(|demand| self.needs.fits(demand, pools))
    }

    /// Sum of demand still held or awaited by every entry.
    pub fn outstanding_demand(&self) -> u64 {
        self.entries.iter().map(|e| self.effective(e)).sum()
    }

    // ── Updates ────────────────────────────────────────────────

    pub fn mark_admitted(&mut self, rank: Rank) {
        self.admitted.insert(rank);
    }

    /// Record a finished job. If it was queued ahead of `me`, its slot
    /// and units are released.
    pub fn mark_completed(&mut self, from: Rank, job_id: JobId) -> Result<(), ProtocolViolation> {
        let Some(&demand) = self.demands.get(&job_id) else {
            return Err(ProtocolViolation::UnknownJob {
                tag: Tag::JobComplete,
                from,
                job_id,
            });
        };
        if !self.completed.insert(job_id) {
            return Err(ProtocolViolation::Duplicate {
                tag: Tag::JobComplete,
                from,
            });
        }

        if self.complete {
            let finished = self.entries.iter().position(|e| e.job_id() == job_id);
            if let (Some(finished), Some(mine)) = (finished, self.my_position()) {
                if finished < mine {
                    self.needs.slots = self.needs.slots.saturating_sub(1);
                    self.needs.units = self.needs.units.saturating_sub(demand);
                }
            }
        }
        self.check_needs();
        Ok(())
    }

    /// Exchange the delegating and delegated entries and adjust `needs`
    /// for `me`'s side of the exchange.
    pub fn apply_swap(&mut self, swap: SwapRequest) -> Result<SwapOutcome, ProtocolViolation> {
        if !self.complete {
            self.deferred_swaps.push_back(swap);
            return Ok(SwapOutcome::Deferred);
        }

        let delegating = self
            .position(swap.delegating_rank)
            .ok_or(ProtocolViolation::UnknownEntry(swap.delegating_rank))?;
        let delegated = self
            .position(swap.delegated_rank)
            .ok_or(ProtocolViolation::UnknownEntry(swap.delegated_rank))?;

        let (front, back) = (delegating.min(delegated), delegating.max(delegated));
        if let Some(mine) = self.my_position() {
            if mine == front {
                // Moving back: everything up to the old back entry is now ahead.
                let gained = self.held_by(front + 1..=back);
                self.needs.slots += gained.slots;
                self.needs.units += gained.units;
            } else if mine == back {
                let released = self.held_by(front..=back - 1);
                self.needs.slots = self.needs.slots.saturating_sub(released.slots);
                self.needs.units = self.needs.units.saturating_sub(released.units);
            } else if front < mine && mine < back {
                let promoted = self.held_by(back..=back);
                let demoted = self.held_by(front..=front);
                self.needs.slots = (self.needs.slots + promoted.slots).saturating_sub(demoted.slots);
                self.needs.units = (self.needs.units + promoted.units).saturating_sub(demoted.units);
            }
        }

        self.entries.swap(front, back);
        self.check_needs();
        Ok(SwapOutcome::Applied {
            delegating,
            delegated,
        })
    }

    fn check_needs(&self) {
        debug_assert!(
            !self.complete || self.recompute().is_none_or(|n| n == self.needs),
            "cached needs diverged from queue order"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairshare_core::ResourceRequest;

    fn batch(demands: &[u64]) -> Vec<Job> {
        demands
            .iter()
            .enumerate()
            .map(|(i, &demand)| Job {
                id: i as u64,
                demand,
            })
            .collect()
    }

    fn entry(rank: Rank, timestamp: u64, job_id: JobId) -> AllocationEntry {
        AllocationEntry::new(rank, ResourceRequest { timestamp, job_id })
    }

    /// Ranks 1..=n in that order, rank r holding job r-1.
    fn queue_for(me: Rank, demands: &[u64]) -> AllocationQueue {
        let jobs = batch(demands);
        let n = demands.len();
        let own = entry(me, me as u64, (me - 1) as u64);
        let mut queue = AllocationQueue::new(me, own, n, &jobs);
        for rank in (1..=n).filter(|&r| r != me) {
            queue.insert(entry(rank, rank as u64, (rank - 1) as u64)).unwrap();
        }
        queue
    }

    fn order(queue: &AllocationQueue) -> Vec<Rank> {
        queue.entries().iter().map(|e| e.rank).collect()
    }

    fn swap(delegating: Rank, delegated: Rank) -> SwapRequest {
        SwapRequest {
            delegating_rank: delegating,
            delegated_rank: delegated,
        }
    }

    #[test]
    fn needs_sum_entries_ahead() {
        let queue = queue_for(3, &[7, 4, 9]);
        assert_eq!(order(&queue), vec![1, 2, 3]);
        assert_eq!(queue.needs(), Some(Needs { slots: 2, units: 11 }));
        assert_eq!(queue.needs(), queue.recompute());
    }

    #[test]
    fn incomplete_queue_has_no_needs() {
        let jobs = batch(&[1, 2]);
        let queue = AllocationQueue::new(1, entry(1, 1, 0), 2, &jobs);
        assert!(!queue.is_complete());
        assert_eq!(queue.needs(), None);
        assert!(!queue.is_admissible(Pools { slots: 9, units: 99 }));
    }

    #[test]
    fn single_winner_queue_is_complete_at_once() {
        let jobs = batch(&[3]);
        let queue = AllocationQueue::new(2, entry(2, 4, 0), 1, &jobs);
        assert!(queue.is_complete());
        assert_eq!(queue.needs(), Some(Needs::default()));
        assert!(queue.is_last());
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let jobs = batch(&[5, 6, 7]);
        let mut queue = AllocationQueue::new(2, entry(2, 8, 1), 3, &jobs);
        queue.insert(entry(3, 2, 2)).unwrap();
        assert!(queue.insert(entry(1, 8, 0)).unwrap());
        assert_eq!(order(&queue), vec![3, 1, 2]);
        assert_eq!(queue.needs(), Some(Needs { slots: 2, units: 12 }));
    }

    #[test]
    fn admission_counts_own_demand_strictly() {
        let queue = queue_for(2, &[6, 4]);
        assert!(!queue.is_admissible(Pools { slots: 5, units: 10 }));
        assert!(queue.is_admissible(Pools { slots: 5, units: 11 }));
        assert!(!queue.is_admissible(Pools { slots: 1, units: 99 }));
    }

    #[test]
    fn needs_of_any_rank_follow_queue_order() {
        let mut queue = queue_for(1, &[7, 4, 9]);
        assert_eq!(queue.needs_of(1), Some(Needs::default()));
        assert_eq!(queue.needs_of(3), Some(Needs { slots: 2, units: 11 }));
        queue.mark_completed(2, 1).unwrap();
        assert_eq!(queue.needs_of(3), Some(Needs { slots: 1, units: 7 }));
        assert_eq!(queue.needs_of(9), None);
    }

    #[test]
    fn completion_ahead_releases_resources() {
        let mut queue = queue_for(3, &[7, 4, 9]);
        queue.mark_completed(1, 0).unwrap();
        assert_eq!(queue.needs(), Some(Needs { slots: 1, units: 4 }));
        assert_eq!(queue.needs(), queue.recompute());
    }

    #[test]
    fn completion_behind_changes_nothing() {
        let mut queue = queue_for(1, &[7, 4, 9]);
        queue.mark_completed(3, 2).unwrap();
        assert_eq!(queue.needs(), Some(Needs::default()));
        assert_eq!(queue.outstanding_demand(), 11);
    }

    #[test]
    fn completion_before_queue_closes_is_counted_on_close() {
        let jobs = batch(&[7, 4]);
        let mut queue = AllocationQueue::new(2, entry(2, 2, 1), 2, &jobs);
        queue.mark_completed(1, 0).unwrap();
        queue.insert(entry(1, 1, 0)).unwrap();
        assert_eq!(queue.needs(), Some(Needs::default()));
    }

    #[test]
    fn duplicate_and_unknown_completions_rejected() {
        let mut queue = queue_for(2, &[3, 3]);
        queue.mark_completed(1, 0).unwrap();
        assert!(matches!(
            queue.mark_completed(1, 0),
            Err(ProtocolViolation::Duplicate { .. })
        ));
        assert!(matches!(
            queue.mark_completed(1, 42),
            Err(ProtocolViolation::UnknownJob { job_id: 42, .. })
        ));
        assert_eq!(queue.needs(), Some(Needs::default()));
    }

    #[test]
    fn request_for_unknown_job_rejected() {
        let jobs = batch(&[3, 3]);
        let mut queue = AllocationQueue::new(1, entry(1, 1, 0), 2, &jobs);
        assert!(matches!(
            queue.insert(entry(2, 1, 9)),
            Err(ProtocolViolation::UnknownJob { job_id: 9, .. })
        ));
        assert!(!queue.is_complete());
    }

    #[test]
    fn swap_exchanges_exactly_two_positions() {
        let demands = [9, 2, 3, 1, 5];
        let mut queue = queue_for(5, &demands);
        let before = queue.outstanding_demand();

        let outcome = queue.apply_swap(swap(2, 4)).unwrap();
        assert_eq!(
            outcome,
            SwapOutcome::Applied {
                delegating: 1,
                delegated: 3
            }
        );
        assert_eq!(order(&queue), vec![1, 4, 3, 2, 5]);
        assert_eq!(queue.outstanding_demand(), before);
    }

    #[test]
    fn swap_deltas_match_recompute_for_every_viewer() {
        let demands = [9, 6, 3, 1, 5];
        for me in 1..=5 {
            let mut queue = queue_for(me, &demands);
            queue.mark_completed(3, 2).unwrap();
            queue.apply_swap(swap(2, 4)).unwrap();
            assert_eq!(queue.needs(), queue.recompute(), "viewer {me}");
        }
    }

    #[test]
    fn delegating_worker_moves_behind_candidate() {
        let mut queue = queue_for(1, &[8, 3, 2]);
        queue.apply_swap(swap(1, 3)).unwrap();
        assert_eq!(order(&queue), vec![3, 2, 1]);
        assert_eq!(queue.needs(), Some(Needs { slots: 2, units: 5 }));
    }

    #[test]
    fn delegated_worker_moves_ahead() {
        let mut queue = queue_for(3, &[8, 3, 2]);
        queue.apply_swap(swap(1, 3)).unwrap();
        assert_eq!(queue.needs(), Some(Needs::default()));
    }

    #[test]
    fn worker_between_sees_lighter_job_ahead() {
        let mut queue = queue_for(2, &[8, 3, 2]);
        queue.apply_swap(swap(1, 3)).unwrap();
        assert_eq!(queue.needs(), Some(Needs { slots: 1, units: 2 }));
    }

    #[test]
    fn swap_before_queue_closes_is_replayed() {
        let jobs = batch(&[8, 3, 2]);
        let mut queue = AllocationQueue::new(2, entry(2, 2, 1), 3, &jobs);
        assert_eq!(queue.apply_swap(swap(1, 3)).unwrap(), SwapOutcome::Deferred);
        queue.insert(entry(1, 1, 0)).unwrap();
        queue.insert(entry(3, 3, 2)).unwrap();
        assert_eq!(order(&queue), vec![3, 2, 1]);
        assert_eq!(queue.needs(), Some(Needs { slots: 1, units: 2 }));
    }

    #[test]
    fn swap_with_unknown_rank_rejected() {
        let mut queue = queue_for(1, &[1, 2]);
        assert_eq!(
            queue.apply_swap(swap(1, 7)),
            Err(ProtocolViolation::UnknownEntry(7))
        );
        assert_eq!(order(&queue), vec![1, 2]);
    }

    #[test]
    fn pending_excludes_admitted_and_completed() {
        let mut queue = queue_for(1, &[1, 2, 3]);
        queue.mark_admitted(2);
        queue.mark_completed(3, 2).unwrap();
        assert!(queue.is_pending(1));
        assert!(!queue.is_pending(2));
        assert!(!queue.is_pending(3));
        assert!(!queue.is_pending(9));
    }
}
