//! Scheduler error types.

use fairshare_core::{ConfigError, JobId, Rank};
use thiserror::Error;

use crate::message::Tag;

/// Errors that stop a worker or coordinator driver.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown rank: {0}")]
    UnknownRank(Rank),

    #[error("mailbox closed for rank {0}")]
    Disconnected(Rank),

    #[error("cancelled while {0}")]
    Cancelled(String),

    #[error("task failed: {0}")]
    Task(String),
}

pub type SchedResult<T> = Result<T, SchedError>;

/// A message that breaks the protocol's expectations.
///
/// These never stop a process: the receiver logs them and drops the
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("duplicate {tag} from rank {from}")]
    Duplicate { tag: Tag, from: Rank },

    #[error("{tag} from rank {from} after its queue closed")]
    QueueClosed { tag: Tag, from: Rank },

    #[error("{tag} from rank {from}, which is not a winner this round")]
    NotAWinner { tag: Tag, from: Rank },

    #[error("{tag} from rank {from} names unknown job {job_id}")]
    UnknownJob { tag: Tag, from: Rank, job_id: JobId },

    #[error("swap names rank {0}, which has no allocation entry")]
    UnknownEntry(Rank),

    #[error("unexpected {tag} from rank {from}")]
    Unexpected { tag: Tag, from: Rank },
}
