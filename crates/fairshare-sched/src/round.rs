//! Worker round state machine.
//!
//! Pure protocol logic: [`WorkerRound::handle`] takes one envelope and
//! returns the envelopes to send. Sleeping, receiving, and stall
//! diagnostics belong to the async driver in [`crate::worker`].
//!
//! ```text
//! Bidding ──lost──▶ Finished
//!    │ won
//!    ▼
//! Negotiating ──queue complete──▶ Allocating ──admitted──▶ Executing ──▶ Finished
//!                                   │     ▲
//!                         DELEGATE  ▼     │ SWAP / ALLOCATE / DECLINED
//!                                 Delegating
//! ```

use std::collections::VecDeque;
use std::fmt;

use fairshare_core::{
    AllocationEntry, Bid, BidEntry, COORDINATOR_RANK, Job, LamportClock, Pools, Rank,
    ResourceRequest, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::allocation::{AllocationQueue, SwapOutcome};
use crate::bidding::{Assignment, BiddingQueue};
use crate::delegation::{self, Delegation, Verdict};
use crate::error::ProtocolViolation;
use crate::message::{Envelope, Outgoing, Payload, Tag};

/// State a worker carries from one round to the next.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub rank: Rank,
    /// Every worker rank, this one included.
    pub workers: Vec<Rank>,
    pub pools: Pools,
    pub clock: LamportClock,
    pub hunger: u32,
}

impl WorkerContext {
    pub fn new(rank: Rank, workers: Vec<Rank>, pools: Pools) -> Self {
        Self {
            rank,
            workers,
            pools,
            clock: LamportClock::new(),
            hunger: 0,
        }
    }

    fn peers(&self) -> Vec<Rank> {
        self.workers.iter().copied().filter(|&r| r != self.rank).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Bidding,
    Negotiating,
    Allocating,
    Delegating { candidate: Rank },
    Executing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Bidding => f.write_str("bidding"),
            Phase::Negotiating => f.write_str("negotiating"),
            Phase::Allocating => f.write_str("allocating"),
            Phase::Delegating { candidate } => write!(f, "delegating to rank {candidate}"),
            Phase::Executing => f.write_str("executing"),
            Phase::Finished => f.write_str("finished"),
        }
    }
}

/// What happened to one worker in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: u64,
    pub job: Option<Job>,
    pub bid_position: Option<usize>,
    /// Final position in the allocation queue, after any swaps.
    pub allocation_position: Option<usize>,
    pub swaps: u32,
    /// Hunger carried into the next round.
    pub hunger: u32,
}

#[derive(Debug)]
pub struct WorkerRound {
    round: u64,
    jobs: Vec<Job>,
    phase: Phase,
    bids: BiddingQueue,
    /// Non-bid traffic that arrived before bidding closed.
    early: VecDeque<Envelope>,
    job: Option<Job>,
    bid_position: Option<usize>,
    winners: Vec<Rank>,
    allocation: Option<AllocationQueue>,
    /// DELEGATE offers that arrived before the allocation queue closed.
    offers: VecDeque<Rank>,
    delegation: Delegation,
}

impl WorkerRound {
    /// Start a round on receipt of the job batch: place this worker's bid.
    pub fn begin(ctx: &mut WorkerContext, round: u64, jobs: Vec<Job>) -> (Self, Vec<Outgoing>) {
        let mut state = Self {
            round,
            jobs,
            phase: Phase::Bidding,
            bids: BiddingQueue::new(ctx.workers.len()),
            early: VecDeque::new(),
            job: None,
            bid_position: None,
            winners: Vec::new(),
            allocation: None,
            offers: VecDeque::new(),
            delegation: Delegation::default(),
        };

        let timestamp = ctx.clock.tick();
        let bid = Bid {
            timestamp,
            hunger: ctx.hunger,
        };
        debug!(
            rank = ctx.rank,
            round,
            clock = timestamp,
            hunger = ctx.hunger,
            jobs = state.jobs.len(),
            "placing bid"
        );

        let mut out = vec![Outgoing::multicast(
            ctx.peers(),
            state.envelope_at(ctx.rank, timestamp, Payload::Bid(bid)),
        )];
        if let Err(violation) = state.bids.insert(BidEntry::new(ctx.rank, bid)) {
            warn!(rank = ctx.rank, %violation, "own bid rejected");
        }
        if state.bids.is_complete() {
            out.extend(state.close_bidding(ctx));
        }
        (state, out)
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The job to run, while in `Executing`.
    pub fn execution(&self) -> Option<Job> {
        match self.phase {
            Phase::Executing => self.job,
            _ => None,
        }
    }

    pub fn allocation(&self) -> Option<&AllocationQueue> {
        self.allocation.as_ref()
    }

    pub fn outcome(&self, ctx: &WorkerContext) -> RoundOutcome {
        RoundOutcome {
            round: self.round,
            job: self.job,
            bid_position: self.bid_position,
            allocation_position: self.allocation.as_ref().and_then(|q| q.my_position()),
            swaps: self.delegation.swaps(),
            hunger: ctx.hunger,
        }
    }

    /// Process one received envelope of this round.
    pub fn handle(
        &mut self,
        ctx: &mut WorkerContext,
        envelope: Envelope,
    ) -> Result<Vec<Outgoing>, ProtocolViolation> {
        ctx.clock.observe(envelope.timestamp);
        self.route(ctx, envelope)
    }

    /// Report completion after the job has run.
    pub fn finish_execution(&mut self, ctx: &mut WorkerContext) -> Vec<Outgoing> {
        let Some(job) = self.execution() else {
            return Vec::new();
        };
        if let Some(queue) = self.allocation.as_mut() {
            if let Err(violation) = queue.mark_completed(ctx.rank, job.id) {
                debug!(rank = ctx.rank, %violation, "own completion already recorded");
            }
        }
        ctx.hunger = 0;
        self.phase = Phase::Finished;
        info!(rank = ctx.rank, round = self.round, job_id = job.id, "job complete");

        let mut to = vec![COORDINATOR_RANK];
        to.extend(ctx.peers());
        vec![Outgoing::multicast(
            to,
            self.envelope(ctx, Payload::JobComplete(job.id)),
        )]
    }

    // ── Routing ────────────────────────────────────────────────

    fn route(
        &mut self,
        ctx: &mut WorkerContext,
        envelope: Envelope,
    ) -> Result<Vec<Outgoing>, ProtocolViolation> {
        let from = envelope.from;
        let tag = envelope.tag();

        if matches!(envelope.payload, Payload::JobBatch(_)) {
            return Err(ProtocolViolation::Unexpected { tag, from });
        }

        match self.phase {
            Phase::Bidding => {
                if let Payload::Bid(bid) = envelope.payload {
                    self.bids.insert(BidEntry::new(from, bid))?;
                    if self.bids.is_complete() {
                        return Ok(self.close_bidding(ctx));
                    }
                } else {
                    trace!(rank = ctx.rank, from, %tag, "buffering until bidding closes");
                    self.early.push_back(envelope);
                }
                Ok(Vec::new())
            }
            _ if tag == Tag::Bid => Err(ProtocolViolation::QueueClosed { tag, from }),
            Phase::Finished if self.allocation.is_none() => {
                trace!(rank = ctx.rank, from, %tag, "no allocation queue, ignoring message");
                Ok(Vec::new())
            }
            // Executing and finished winners keep their queue in step
            // with everyone else's; `advance` leaves their phase alone.
            _ => self.route_allocation(ctx, envelope),
        }
    }

    fn route_allocation(
        &mut self,
        ctx: &mut WorkerContext,
        envelope: Envelope,
    ) -> Result<Vec<Outgoing>, ProtocolViolation> {
        let from = envelope.from;
        let tag = envelope.tag();
        let me = ctx.rank;
        let is_winner = self.winners.contains(&from);
        let mut out = Vec::new();

        let Some(queue) = self.allocation.as_mut() else {
            return Err(ProtocolViolation::Unexpected { tag, from });
        };

        match envelope.payload {
            Payload::ResourceRequest(request) => {
                if !is_winner {
                    return Err(ProtocolViolation::NotAWinner { tag, from });
                }
                queue.insert(AllocationEntry::new(from, request))?;
            }
            Payload::JobComplete(job_id) => {
                queue.mark_completed(from, job_id)?;
                self.delegation.unpark();
            }
            Payload::Allocate => {
                if !is_winner {
                    return Err(ProtocolViolation::NotAWinner { tag, from });
                }
                queue.mark_admitted(from);
                self.delegation.unpark();
                if self.delegation.candidate() == Some(from) {
                    debug!(rank = me, candidate = from, "candidate admitted, delegation resolved");
                    self.delegation.resolve();
                    self.phase = Phase::Allocating;
                }
            }
            Payload::Swap(swap) => {
                let outcome = queue.apply_swap(swap)?;
                if let SwapOutcome::Applied {
                    delegating,
                    delegated,
                } = outcome
                {
                    debug!(
                        rank = me,
                        delegating_rank = swap.delegating_rank,
                        delegated_rank = swap.delegated_rank,
                        from_position = delegating,
                        to_position = delegated,
                        "swap applied"
                    );
                }
                self.delegation.unpark();
                if swap.delegating_rank == me
                    && self.delegation.candidate() == Some(swap.delegated_rank)
                {
                    self.delegation.resolve();
                    self.delegation.record_swap();
                    self.phase = Phase::Allocating;
                }
            }
            Payload::Delegate => {
                if !is_winner {
                    return Err(ProtocolViolation::NotAWinner { tag, from });
                }
                if queue.is_complete() {
                    out.extend(self.answer_offer(ctx, from));
                } else {
                    self.offers.push_back(from);
                }
            }
            Payload::DelegateDeclined => {
                if self.delegation.candidate() == Some(from) {
                    debug!(rank = me, candidate = from, "delegation declined");
                    self.delegation.decline();
                    self.phase = Phase::Allocating;
                } else {
                    debug!(rank = me, from, "stale decline ignored");
                }
            }
            Payload::Bid(_) | Payload::JobBatch(_) => {
                return Err(ProtocolViolation::Unexpected { tag, from });
            }
        }

        out.extend(self.advance(ctx));
        Ok(out)
    }

    // ── Transitions ────────────────────────────────────────────

    fn close_bidding(&mut self, ctx: &mut WorkerContext) -> Vec<Outgoing> {
        let Some(assignment) = self.bids.assignment(ctx.rank, &self.jobs) else {
            return Vec::new();
        };
        self.winners = self.bids.winners(self.jobs.len());

        match assignment {
            Assignment::Lost { position } => {
                self.bid_position = Some(position);
                ctx.hunger = ctx.hunger.saturating_add(1);
                self.phase = Phase::Finished;
                self.early.clear();
                debug!(
                    rank = ctx.rank,
                    round = self.round,
                    position,
                    hunger = ctx.hunger,
                    "no job this round"
                );
                Vec::new()
            }
            Assignment::Won { position, job } => {
                self.bid_position = Some(position);
                self.job = Some(job);
                info!(
                    rank = ctx.rank,
                    round = self.round,
                    position,
                    job_id = job.id,
                    demand = job.demand,
                    "won job"
                );

                let timestamp = ctx.clock.tick();
                let request = ResourceRequest {
                    timestamp,
                    job_id: job.id,
                };
                self.allocation = Some(AllocationQueue::new(
                    ctx.rank,
                    AllocationEntry::new(ctx.rank, request),
                    self.winners.len(),
                    &self.jobs,
                ));
                self.phase = Phase::Negotiating;

                let others = self.other_winners(ctx.rank);
                let mut out = vec![Outgoing::multicast(
                    others,
                    self.envelope_at(ctx.rank, timestamp, Payload::ResourceRequest(request)),
                )];

                let early: Vec<_> = self.early.drain(..).collect();
                for envelope in early {
                    match self.route(ctx, envelope) {
                        Ok(more) => out.extend(more),
                        Err(violation) => {
                            warn!(rank = ctx.rank, %violation, "discarding buffered message")
                        }
                    }
                }
                out.extend(self.advance(ctx));
                out
            }
        }
    }

    /// Move forward as far as the current view allows.
    fn advance(&mut self, ctx: &mut WorkerContext) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let complete = self.allocation.as_ref().is_some_and(|q| q.is_complete());

        if self.phase == Phase::Negotiating && complete {
            self.phase = Phase::Allocating;
            let offers: Vec<_> = self.offers.drain(..).collect();
            for from in offers {
                out.extend(self.answer_offer(ctx, from));
            }
        }
        if self.phase != Phase::Allocating {
            return out;
        }

        let Some(queue) = self.allocation.as_mut() else {
            return out;
        };
        if queue.is_admissible(ctx.pools) {
            queue.mark_admitted(ctx.rank);
            self.phase = Phase::Executing;
            let needs = queue.needs().unwrap_or_default();
            info!(
                rank = ctx.rank,
                round = self.round,
                job_id = ?self.job.map(|j| j.id),
                position = ?queue.my_position(),
                slots_needed = needs.slots,
                units_needed = needs.units,
                "resources granted"
            );
            out.push(self.to_winners(ctx, Payload::Allocate));
            return out;
        }

        if delegation::should_delegate(queue, ctx.pools, &self.delegation) {
            match delegation::find_candidate(queue, ctx.rank, ctx.pools) {
                Some(candidate) => {
                    info!(
                        rank = ctx.rank,
                        round = self.round,
                        candidate,
                        "offering queue position"
                    );
                    self.delegation.begin(candidate);
                    self.phase = Phase::Delegating { candidate };
                    let envelope = self.envelope(ctx, Payload::Delegate);
                    out.push(Outgoing::unicast(candidate, envelope));
                }
                None => {
                    trace!(rank = ctx.rank, "blocked with no delegation candidate");
                }
            }
        }
        out
    }

    /// Candidate side of a DELEGATE. The queue is complete.
    fn answer_offer(&mut self, ctx: &mut WorkerContext, requester: Rank) -> Vec<Outgoing> {
        let Some(queue) = self.allocation.as_mut() else {
            return Vec::new();
        };

        match delegation::evaluate_offer(queue, ctx.rank, requester, ctx.pools, &self.delegation) {
            Verdict::Accept(swap) => {
                if let Err(violation) = queue.apply_swap(swap) {
                    warn!(rank = ctx.rank, %violation, "could not apply accepted swap");
                    let envelope = self.envelope(ctx, Payload::DelegateDeclined);
                    return vec![Outgoing::unicast(requester, envelope)];
                }
                self.delegation.record_swap();
                self.delegation.unpark();
                info!(
                    rank = ctx.rank,
                    round = self.round,
                    requester,
                    position = ?queue.my_position(),
                    "accepted delegated position"
                );
                vec![self.to_winners(ctx, Payload::Swap(swap))]
            }
            Verdict::Decline(reason) => {
                debug!(rank = ctx.rank, requester, %reason, "declining delegation");
                let envelope = self.envelope(ctx, Payload::DelegateDeclined);
                vec![Outgoing::unicast(requester, envelope)]
            }
            Verdict::Silent => Vec::new(),
        }
    }

    // ── Envelopes ──────────────────────────────────────────────

    fn other_winners(&self, me: Rank) -> Vec<Rank> {
        self.winners.iter().copied().filter(|&r| r != me).collect()
    }

    fn to_winners(&self, ctx: &mut WorkerContext, payload: Payload) -> Outgoing {
        let envelope = self.envelope(ctx, payload);
        Outgoing::multicast(self.other_winners(ctx.rank), envelope)
    }

    fn envelope(&self, ctx: &mut WorkerContext, payload: Payload) -> Envelope {
        let timestamp = ctx.clock.tick();
        self.envelope_at(ctx.rank, timestamp, payload)
    }

    fn envelope_at(&self, from: Rank, timestamp: Timestamp, payload: Payload) -> Envelope {
        Envelope {
            from,
            round: self.round,
            timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairshare_core::Needs;
    use std::collections::BTreeMap;

    /// Drives a set of round machines by hand, delivering envelopes in
    /// FIFO order across the whole group.
    struct Harness {
        contexts: BTreeMap<Rank, WorkerContext>,
        rounds: BTreeMap<Rank, WorkerRound>,
        wire: VecDeque<(Rank, Envelope)>,
        to_coordinator: Vec<Envelope>,
    }

    impl Harness {
        fn start(workers: usize, pools: Pools, demands: &[u64]) -> Self {
            let ranks: Vec<Rank> = (1..=workers).collect();
            let jobs: Vec<Job> = demands
                .iter()
                .enumerate()
                .map(|(i, &demand)| Job {
                    id: i as u64,
                    demand,
                })
                .collect();
            let mut harness = Self {
                contexts: ranks
                    .iter()
                    .map(|&r| (r, WorkerContext::new(r, ranks.clone(), pools)))
                    .collect(),
                rounds: BTreeMap::new(),
                wire: VecDeque::new(),
                to_coordinator: Vec::new(),
            };
            for rank in ranks {
                let ctx = harness.contexts.get_mut(&rank).unwrap();
                let (round, out) = WorkerRound::begin(ctx, 0, jobs.clone());
                harness.rounds.insert(rank, round);
                harness.post(rank, out);
            }
            harness
        }

        fn post(&mut self, from: Rank, out: Vec<Outgoing>) {
            for outgoing in out {
                for to in outgoing.to.into_iter().filter(|&r| r != from) {
                    if to == COORDINATOR_RANK {
                        self.to_coordinator.push(outgoing.envelope.clone());
                    } else {
                        self.wire.push_back((to, outgoing.envelope.clone()));
                    }
                }
            }
        }

        /// Deliver until quiet. Executing workers finish when `finish` says so.
        fn settle(&mut self, finish: impl Fn(Rank) -> bool) {
            loop {
                while let Some((to, envelope)) = self.wire.pop_front() {
                    let ctx = self.contexts.get_mut(&to).unwrap();
                    let round = self.rounds.get_mut(&to).unwrap();
                    let out = round.handle(ctx, envelope).unwrap_or_default();
                    self.post(to, out);
                }
                let ready: Vec<Rank> = self
                    .rounds
                    .iter()
                    .filter(|(r, s)| s.phase() == Phase::Executing && finish(**r))
                    .map(|(r, _)| *r)
                    .collect();
                if ready.is_empty() {
                    return;
                }
                for rank in ready {
                    let ctx = self.contexts.get_mut(&rank).unwrap();
                    let out = self.rounds.get_mut(&rank).unwrap().finish_execution(ctx);
                    self.post(rank, out);
                }
            }
        }

        fn phase(&self, rank: Rank) -> Phase {
            self.rounds[&rank].phase()
        }

        fn holder_of(&self, job_id: u64) -> Rank {
            *self
                .rounds
                .iter()
                .find(|(_, s)| s.job.map(|j| j.id) == Some(job_id))
                .unwrap()
                .0
        }
    }

    #[test]
    fn single_worker_runs_alone() {
        let mut h = Harness::start(1, Pools { slots: 1, units: 5 }, &[3]);
        assert_eq!(h.phase(1), Phase::Executing);
        h.settle(|_| true);
        assert_eq!(h.phase(1), Phase::Finished);
        assert_eq!(h.to_coordinator.len(), 1);
        assert_eq!(h.contexts[&1].hunger, 0);
    }

    #[test]
    fn losers_finish_and_get_hungrier() {
        let mut h = Harness::start(4, Pools { slots: 5, units: 10 }, &[5, 8]);
        h.settle(|_| false);

        let winners: Vec<_> = (1..=4).filter(|r| h.rounds[r].job.is_some()).collect();
        assert_eq!(winners.len(), 2);
        for rank in (1..=4).filter(|r| !winners.contains(r)) {
            assert_eq!(h.phase(rank), Phase::Finished);
            assert_eq!(h.contexts[&rank].hunger, 1);
        }
    }

    #[test]
    fn both_fit_without_delegation() {
        let mut h = Harness::start(4, Pools { slots: 5, units: 14 }, &[5, 8]);
        h.settle(|_| false);

        // Head needs nothing; second has one slot and 5 or 8 units ahead.
        let first = h.holder_of(0);
        let second = h.holder_of(1);
        assert_eq!(h.phase(first), Phase::Executing);
        assert_eq!(h.phase(second), Phase::Executing);

        h.settle(|_| true);
        assert_eq!(h.to_coordinator.len(), 2);
        for rank in [first, second] {
            let outcome = h.rounds[&rank].outcome(&h.contexts[&rank]);
            assert_eq!(outcome.swaps, 0);
            assert_eq!(outcome.hunger, 0);
        }
    }

    #[test]
    fn blocked_worker_waits_for_completion_ahead() {
        // 7 + 3 does not fit in 8 units whichever job is first.
        let mut h = Harness::start(2, Pools { slots: 5, units: 8 }, &[7, 3]);
        h.settle(|_| false);

        let queue = h.rounds[&1].allocation().unwrap();
        let head = queue.entries()[0].rank;
        let tail = queue.entries()[1].rank;
        assert_eq!(h.phase(head), Phase::Executing);
        assert_eq!(h.phase(tail), Phase::Allocating);

        h.settle(|r| r == head);
        assert_eq!(h.phase(head), Phase::Finished);
        assert_eq!(h.phase(tail), Phase::Executing);

        h.settle(|_| true);
        assert_eq!(h.to_coordinator.len(), 2);
    }

    fn queue_views(h: &Harness) -> Vec<Vec<Rank>> {
        h.rounds
            .values()
            .filter_map(|s| s.allocation())
            .map(|q| q.entries().iter().map(|e| e.rank).collect())
            .collect()
    }

    #[test]
    fn blocked_worker_delegates_to_lighter_peer() {
        // Equal bids and request clocks: rank r holds job r-1 and the
        // allocation queue is in rank order. Rank 2 (5) is blocked
        // behind the head's 6 units; the room of 4 fits rank 4 (2) but
        // not rank 3 (4).
        let mut h = Harness::start(4, Pools { slots: 5, units: 10 }, &[6, 5, 4, 2]);
        h.settle(|_| false);

        let views = queue_views(&h);
        assert_eq!(views.len(), 4);
        assert!(views.windows(2).all(|w| w[0] == w[1]), "views diverged: {views:?}");
        assert_eq!(views[0], vec![1, 4, 3, 2]);

        // The head was already executing and still applied the swap.
        assert_eq!(h.phase(1), Phase::Executing);
        assert_eq!(h.phase(4), Phase::Executing);
        assert_eq!(h.phase(3), Phase::Allocating);
        assert_eq!(h.phase(2), Phase::Allocating);
        let swaps: Vec<u32> = (1..=4)
            .map(|r| h.rounds[&r].outcome(&h.contexts[&r]).swaps)
            .collect();
        assert_eq!(swaps, vec![0, 1, 0, 1]);

        h.settle(|_| true);
        assert_eq!(h.to_coordinator.len(), 4);
        let views = queue_views(&h);
        assert!(views.windows(2).all(|w| w[0] == w[1]), "views diverged: {views:?}");
        for rank in 1..=4 {
            assert_eq!(h.phase(rank), Phase::Finished);
            let queue = h.rounds[&rank].allocation().unwrap();
            assert_eq!(queue.needs(), queue.recompute());
        }
    }

    #[test]
    fn executing_worker_tracks_completions_ahead() {
        let mut h = Harness::start(2, Pools { slots: 5, units: 20 }, &[4, 5]);
        h.settle(|_| false);
        let head = h.rounds[&1].allocation().unwrap().entries()[0].rank;
        let tail = if head == 1 { 2 } else { 1 };
        assert_eq!(h.phase(tail), Phase::Executing);

        h.settle(|r| r == head);
        let queue = h.rounds[&tail].allocation().unwrap();
        assert_eq!(queue.needs(), Some(Needs::default()));
    }

    #[test]
    fn no_delegation_when_pool_slots_bind() {
        let mut h = Harness::start(4, Pools { slots: 2, units: 100 }, &[4, 9, 7, 2]);
        h.settle(|_| false);

        // Two entries fit (slots_needed 0 and 1); rank 4 is lighter than
        // rank 3 but could not start in its place either.
        assert_eq!(h.phase(1), Phase::Executing);
        assert_eq!(h.phase(2), Phase::Executing);
        assert_eq!(h.phase(3), Phase::Allocating);
        assert_eq!(h.phase(4), Phase::Allocating);

        h.settle(|_| true);
        assert_eq!(h.to_coordinator.len(), 4);
        assert!((1..=4).all(|r| h.rounds[&r].outcome(&h.contexts[&r]).swaps == 0));
    }

    #[test]
    fn bids_after_close_are_rejected() {
        let mut h = Harness::start(2, Pools { slots: 5, units: 30 }, &[1]);
        h.settle(|_| false);
        let ctx = h.contexts.get_mut(&1).unwrap();
        let round = h.rounds.get_mut(&1).unwrap();
        let late = Envelope {
            from: 2,
            round: 0,
            timestamp: 1,
            payload: Payload::Bid(Bid {
                timestamp: 1,
                hunger: 0,
            }),
        };
        assert_eq!(
            round.handle(ctx, late),
            Err(ProtocolViolation::QueueClosed {
                tag: Tag::Bid,
                from: 2
            })
        );
    }

    #[test]
    fn clock_advances_on_every_receive() {
        let mut h = Harness::start(3, Pools::default(), &[10]);
        let before = h.contexts[&2].clock.current();
        h.settle(|_| false);
        assert!(h.contexts[&2].clock.current() >= before + 2);
    }
}
