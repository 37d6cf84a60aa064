use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::machine::error::{ApplyResult, InitError, QueryError, SnapshotError};
use crate::machine::lifecycle::IllegalTransition;
use crate::machine::position::LogPosition;

// A state machine kept on every member of a replicated cluster. The
// replication engine decides which entries are committed and in what order;
// an implementation of this trait guarantees exactly-once, in-order
// application of those entries and correct recovery after restart. This is
// the only surface the engine depends on.
#[async_trait]
pub trait ReplicatedStateMachine {
    // Called exactly once before any entries are delivered. Restores the
    // most recent snapshot, if any, and starts the apply worker.
    async fn initialize(&self) -> Result<(), InitError>;

    // The sole entry point for committed log application. The supplied
    // position must be strictly ahead of everything applied so far;
    // redelivery of already-applied entries resolves harmlessly as
    // `ApplyOutcome::AlreadyApplied`.
    async fn apply_entry(&self, position: LogPosition, raw: Bytes) -> ApplyResult;

    // Serves a read without going through the apply queue. The view is
    // consistent: reads take the same lock as the apply worker.
    async fn query(&self, raw: Bytes) -> Result<QueryOutcome, QueryError>;

    // Like query, but refuses if the ledger has not yet caught up to the
    // supplied position.
    async fn query_stale(
        &self,
        raw: Bytes,
        min_position: LogPosition,
    ) -> Result<QueryOutcome, QueryError>;

    // Captures the current state and durably stores it. Returns the position
    // up to which the snapshot is valid, so the replication engine may
    // truncate its log up to and including that position.
    async fn take_snapshot(&self) -> Result<LogPosition, SnapshotError>;

    // The position of the most recently applied entry.
    async fn last_applied(&self) -> LogPosition;

    // Suspends acceptance of new submissions. Entries already queued keep
    // draining and queries remain available.
    fn pause(&self) -> Result<(), IllegalTransition>;

    // Resumes acceptance of new submissions after a pause.
    fn resume(&self) -> Result<(), IllegalTransition>;

    // Orderly shutdown: stops the worker, fails all still-queued entries
    // with `Closed`, and leaves the machine in its terminal state.
    // Idempotent.
    async fn close(&self);
}

// The consistent view returned by the read path.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub balance: f64,

    // The position of the last entry reflected in the returned balance.
    pub position: LogPosition,
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "current balance is {} as of {}", self.balance, self.position)
    }
}
