//! Priority delegation.
//!
//! A winner W that is blocked by the admission check may offer its
//! earlier queue position to a lighter job queued behind it:
//!
//! ```text
//! W ──DELEGATE──▶ C                       (C: first pending entry after W
//!                                          that would start in W's place)
//! C ──SWAP{W,C}──▶ other winners          (C applied it locally first)
//!   or
//! C ──DELEGATE_DECLINED──▶ W
//!   or (C already admitted)
//! C's ALLOCATE broadcast resolves W
//! ```
//!
//! The promoted job is admitted at W's old position. Each accepted swap
//! also moves a strictly lighter job ahead of a heavier one, so the
//! number of demand inversions in the queue drops and a round performs
//! finitely many swaps.

use fairshare_core::{Pools, Rank, SwapRequest};

use crate::allocation::AllocationQueue;

/// Requester-side delegation bookkeeping for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delegation {
    pending: Option<Rank>,
    parked: bool,
    swaps: u32,
}

impl Delegation {
    /// Awaiting the answer from this candidate.
    pub fn candidate(&self) -> Option<Rank> {
        self.pending
    }

    pub fn is_delegating(&self) -> bool {
        self.pending.is_some()
    }

    /// A decline came back and nothing in the queue has changed since.
    pub fn is_parked(&self) -> bool {
        self.parked
    }

    /// Swaps this worker has taken part in, on either side.
    pub fn swaps(&self) -> u32 {
        self.swaps
    }

    pub fn begin(&mut self, candidate: Rank) {
        self.pending = Some(candidate);
    }

    /// Candidate swapped with us or was admitted.
    pub fn resolve(&mut self) {
        self.pending = None;
    }

    /// Candidate refused. Stay parked until the queue view changes.
    pub fn decline(&mut self) {
        self.pending = None;
        self.parked = true;
    }

    /// The queue changed (swap, completion, or admission).
    pub fn unpark(&mut self) {
        self.parked = false;
    }

    pub fn record_swap(&mut self) {
        self.swaps += 1;
    }
}

/// Whether `me` should look for a candidate now.
pub fn should_delegate(queue: &AllocationQueue, pools: Pools, state: &Delegation) -> bool {
    queue.is_complete()
        && !queue.is_admissible(pools)
        && !queue.is_last()
        && !state.is_delegating()
        && !state.is_parked()
}

/// First pending entry behind `me` that would be admitted in `me`'s
/// place and is strictly lighter than `me`'s job.
///
/// ```text
/// room = pools.units - units held ahead of me
/// candidate: demand < room && demand < my demand
/// ```
///
/// No candidate when the slots ahead already fill pool A or the units
/// ahead leave no room: nobody promoted into this position could start.
pub fn find_candidate(queue: &AllocationQueue, me: Rank, pools: Pools) -> Option<Rank> {
    let mine = queue.position(me)?;
    let my_demand = queue.demand_of(me)?;
    let needs = queue.needs_of(me)?;
    if needs.slots >= pools.slots {
        return None;
    }
    let room = needs.room(pools);
    if room == 0 {
        return None;
    }

    queue.entries()[mine + 1..]
        .iter()
        .map(|e| e.rank)
        .find(|&rank| {
            queue.is_pending(rank)
                && queue
                    .demand_of(rank)
                    .is_some_and(|d| d < room && d < my_demand)
        })
}

/// How a candidate answers a DELEGATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept(SwapRequest),
    Decline(DeclineReason),
    /// Already admitted: the ALLOCATE broadcast answers the requester.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    Delegating,
    NotAhead,
    NoRoom,
    NotLighter,
    RequesterNotPending,
}

impl std::fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeclineReason::Delegating => "candidate is delegating",
            DeclineReason::NotAhead => "requester is not ahead of candidate",
            DeclineReason::NoRoom => "candidate would not start in requester's place",
            DeclineReason::NotLighter => "candidate job is not lighter",
            DeclineReason::RequesterNotPending => "requester is admitted or finished",
        })
    }
}

/// Candidate-side evaluation of a DELEGATE from `requester`. The queue
/// must be complete.
pub fn evaluate_offer(
    queue: &AllocationQueue,
    me: Rank,
    requester: Rank,
    pools: Pools,
    state: &Delegation,
) -> Verdict {
    if !queue.is_pending(me) {
        return Verdict::Silent;
    }
    if state.is_delegating() {
        return Verdict::Decline(DeclineReason::Delegating);
    }
    if !queue.is_pending(requester) {
        return Verdict::Decline(DeclineReason::RequesterNotPending);
    }
    let ahead = match (queue.position(requester), queue.position(me)) {
        (Some(theirs), Some(mine)) => theirs < mine,
        _ => false,
    };
    if !ahead {
        return Verdict::Decline(DeclineReason::NotAhead);
    }
    let fits_in_place = match (queue.needs_of(requester), queue.demand_of(me)) {
        (Some(needs), Some(demand)) => needs.fits(demand, pools),
        _ => false,
    };
    if !fits_in_place {
        return Verdict::Decline(DeclineReason::NoRoom);
    }
    match (queue.demand_of(me), queue.demand_of(requester)) {
        (Some(mine), Some(theirs)) if mine < theirs => Verdict::Accept(SwapRequest {
            delegating_rank: requester,
            delegated_rank: me,
        }),
        _ => Verdict::Decline(DeclineReason::NotLighter),
    }
}
