//! In-process message transport.
//!
//! One unbounded mailbox per rank. Delivery is reliable and FIFO per
//! sender/receiver pair. A multicast enqueues every copy under one
//! mesh-wide lock, so no recipient can react to it before the other
//! copies are queued: a message is always queued behind every message
//! that caused it.
//!
//! ```text
//! Mesh::build(n)
//!   └── Endpoint[rank]
//!       ├── outboxes: senders for every rank (shared, locked per delivery)
//!       ├── inbox: this rank's receiver
//!       └── later: envelopes from future rounds, in arrival order
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fairshare_core::Rank;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{SchedError, SchedResult};
use crate::message::{Envelope, Outgoing};

/// Builds a fully connected set of endpoints.
pub struct Mesh;

impl Mesh {
    /// Create endpoints for ranks `0..size`. Index `i` belongs to rank `i`.
    pub fn build(size: usize) -> Vec<Endpoint> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        let outboxes = Arc::new(Mutex::new(senders));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Endpoint {
                rank,
                outboxes: Arc::clone(&outboxes),
                inbox,
                later: VecDeque::new(),
            })
            .collect()
    }
}

/// One process's view of the mesh.
#[derive(Debug)]
pub struct Endpoint {
    rank: Rank,
    outboxes: Arc<Mutex<Vec<mpsc::UnboundedSender<Envelope>>>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    later: VecDeque<Envelope>,
}

impl Endpoint {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks in the mesh, coordinator included.
    pub fn size(&self) -> usize {
        self.outboxes().len()
    }

    /// Send one envelope. A peer that has already finished its last
    /// round is not an error; the message is dropped.
    pub fn send(&self, to: Rank, envelope: Envelope) -> SchedResult<()> {
        let outboxes = self.outboxes();
        self.push(&outboxes, to, envelope)
    }

    /// Send to every addressee, skipping this endpoint's own rank. All
    /// copies are queued before any other endpoint can send.
    pub fn deliver(&self, outgoing: Outgoing) -> SchedResult<()> {
        let tag = outgoing.tag();
        let Outgoing { to, envelope } = outgoing;
        let outboxes = self.outboxes();
        trace!(rank = self.rank, %tag, recipients = to.len(), "delivering");
        for rank in to.into_iter().filter(|&r| r != self.rank) {
            self.push(&outboxes, rank, envelope.clone())?;
        }
        Ok(())
    }

    pub fn deliver_all(&self, outgoing: Vec<Outgoing>) -> SchedResult<()> {
        outgoing.into_iter().try_for_each(|o| self.deliver(o))
    }

    /// Next envelope belonging to `round`.
    ///
    /// Envelopes from later rounds are held back until that round is
    /// requested. Envelopes from earlier rounds are dropped. Cancel safe:
    /// nothing is lost if the future is dropped between polls.
    pub async fn recv_round(&mut self, round: u64) -> SchedResult<Envelope> {
        if let Some(index) = self.later.iter().position(|e| e.round == round) {
            if let Some(envelope) = self.later.remove(index) {
                return Ok(envelope);
            }
        }

        loop {
            let envelope = self
                .inbox
                .recv()
                .await
                .ok_or(SchedError::Disconnected(self.rank))?;

            if envelope.round == round {
                return Ok(envelope);
            }
            if envelope.round > round {
                trace!(
                    rank = self.rank,
                    from = envelope.from,
                    round = envelope.round,
                    tag = %envelope.tag(),
                    "holding message for a later round"
                );
                self.later.push_back(envelope);
            } else {
                debug!(
                    rank = self.rank,
                    from = envelope.from,
                    round = envelope.round,
                    current = round,
                    tag = %envelope.tag(),
                    "discarding stale message"
                );
            }
        }
    }

    fn outboxes(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Envelope>>> {
        self.outboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(
        &self,
        outboxes: &[mpsc::UnboundedSender<Envelope>],
        to: Rank,
        envelope: Envelope,
    ) -> SchedResult<()> {
        let outbox = outboxes.get(to).ok_or(SchedError::UnknownRank(to))?;
        if outbox.send(envelope).is_err() {
            trace!(rank = self.rank, to, "peer has left, message dropped");
        }
        Ok(())
    }

    /// Envelopes held back for later rounds.
    pub fn held_back(&self) -> usize {
        self.later.len()
    }
}
