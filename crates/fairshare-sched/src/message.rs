//! Message catalogue.
//!
//! | Tag | Payload | Sender → Receiver(s) |
//! |---|---|---|
//! | `JOB_BATCH` | jobs | coordinator → all workers |
//! | `BID` | timestamp, hunger | worker → all other workers |
//! | `RESOURCE_REQUEST` | timestamp, job id | winner → other winners |
//! | `ALLOCATE` | empty | admitted winner → other winners |
//! | `JOB_COMPLETE` | job id | finished winner → all workers + coordinator |
//! | `DELEGATE` | empty | blocked winner → candidate |
//! | `DELEGATE_DECLINED` | empty | candidate → blocked winner |
//! | `SWAP` | delegating rank, delegated rank | candidate → other winners |

use std::fmt;

use fairshare_core::{Bid, Job, JobId, Rank, ResourceRequest, SwapRequest, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    JobBatch,
    Bid,
    ResourceRequest,
    Allocate,
    JobComplete,
    Delegate,
    DelegateDeclined,
    Swap,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::JobBatch => "JOB_BATCH",
            Tag::Bid => "BID",
            Tag::ResourceRequest => "RESOURCE_REQUEST",
            Tag::Allocate => "ALLOCATE",
            Tag::JobComplete => "JOB_COMPLETE",
            Tag::Delegate => "DELEGATE",
            Tag::DelegateDeclined => "DELEGATE_DECLINED",
            Tag::Swap => "SWAP",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    JobBatch(Vec<Job>),
    Bid(Bid),
    ResourceRequest(ResourceRequest),
    Allocate,
    JobComplete(JobId),
    Delegate,
    DelegateDeclined,
    Swap(SwapRequest),
}

impl Payload {
    pub fn tag(&self) -> Tag {
        match self {
            Payload::JobBatch(_) => Tag::JobBatch,
            Payload::Bid(_) => Tag::Bid,
            Payload::ResourceRequest(_) => Tag::ResourceRequest,
            Payload::Allocate => Tag::Allocate,
            Payload::JobComplete(_) => Tag::JobComplete,
            Payload::Delegate => Tag::Delegate,
            Payload::DelegateDeclined => Tag::DelegateDeclined,
            Payload::Swap(_) => Tag::Swap,
        }
    }
}

/// A message as it travels between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Rank,
    /// Batch sequence number the message belongs to.
    pub round: u64,
    /// Sender's clock after ticking for this send.
    pub timestamp: Timestamp,
    pub payload: Payload,
}

impl Envelope {
    pub fn tag(&self) -> Tag {
        self.payload.tag()
    }
}

/// An envelope addressed to one or more ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: Vec<Rank>,
    pub envelope: Envelope,
}

impl Outgoing {
    pub fn unicast(to: Rank, envelope: Envelope) -> Self {
        Self {
            to: vec![to],
            envelope,
        }
    }

    pub fn multicast(to: Vec<Rank>, envelope: Envelope) -> Self {
        Self { to, envelope }
    }

    pub fn tag(&self) -> Tag {
        self.envelope.tag()
    }
}
