//! fairshare-sched — decentralized job bidding, resource admission, and
//! priority delegation.
//!
//! A coordinator publishes batches of jobs. Workers agree, without a
//! central arbiter, on who runs which job (bidding) and on the order in
//! which winners reserve the two shared pools (allocation). A blocked
//! winner may hand its queue position to a lighter job behind it
//! (delegation).
//!
//! # Architecture
//!
//! ```text
//! Cluster
//!   ├── Mesh (one mailbox per rank, FIFO per pair)
//!   ├── run_coordinator ── Coordinator (JOB_BATCH out, JOB_COMPLETE in)
//!   └── run_worker × N ── WorkerRound per batch
//!       ├── BiddingQueue     (hunger desc, clock asc, rank asc)
//!       ├── AllocationQueue  (clock asc, rank asc; cached needs)
//!       └── Delegation       (DELEGATE / SWAP / DELEGATE_DECLINED)
//! ```

pub mod allocation;
pub mod bidding;
pub mod cluster;
pub mod coordinator;
pub mod delegation;
pub mod error;
pub mod jobs;
pub mod message;
pub mod round;
pub mod transport;
pub mod worker;

pub use allocation::AllocationQueue;
pub use bidding::BiddingQueue;
pub use cluster::{Cluster, ClusterReport};
pub use coordinator::{Coordinator, CoordinatorReport, CoordinatorSettings, run_coordinator};
pub use error::{ProtocolViolation, SchedError, SchedResult};
pub use jobs::{JobSource, RandomJobSource, ScriptedJobSource};
pub use message::{Envelope, Outgoing, Payload, Tag};
pub use round::{Phase, RoundOutcome, WorkerRound};
pub use transport::{Endpoint, Mesh};
pub use worker::{WorkerReport, WorkerSettings, run_worker};
