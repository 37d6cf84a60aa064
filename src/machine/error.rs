use thiserror::Error;

use crate::ledger::{ApplyOutcome, DecodeError};
use crate::machine::lifecycle::{IllegalTransition, LifecycleState};
use crate::machine::position::LogPosition;

/// A specialized `Result` type for applying a single committed entry.
pub type ApplyResult = Result<ApplyOutcome, ApplyError>;

/// Errors surfaced while submitting or applying a committed entry. Decode
/// failures are permanent per-entry outcomes returned to the submitting
/// client; an ordering violation is fatal to the replica and halts further
/// application.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("apply queue is full")]
    Backpressure,

    #[error("entry at {position} violates commit order, last applied is {applied}")]
    OutOfOrder {
        position: LogPosition,
        applied: LogPosition,
    },

    #[error("state machine is not accepting entries (state: {0})")]
    NotRunning(LifecycleState),

    #[error("state machine is closed")]
    Closed,
}

/// Errors surfaced on the read path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{op} is not a read-only command")]
    NotReadOnly { op: &'static str },

    #[error("ledger at {applied} has not caught up to {min_position}")]
    NotCaughtUp {
        applied: LogPosition,
        min_position: LogPosition,
    },

    #[error("state machine is not serving queries (state: {0})")]
    NotRunning(LifecycleState),
}

/// Errors from snapshot capture, storage, and restoration. A corrupt
/// snapshot encountered during restore is unrecoverable for this replica.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot storage failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot record is corrupt: {0}")]
    Corrupt(String),

    #[error("state machine is not running (state: {0})")]
    NotRunning(LifecycleState),
}

/// Errors from one-time initialization. A machine that fails to initialize
/// transitions straight to CLOSED and never applies an entry.
#[derive(Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Lifecycle(#[from] IllegalTransition),

    #[error("failed to restore snapshot: {0}")]
    Restore(#[from] SnapshotError),
}
