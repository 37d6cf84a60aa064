use async_std::sync::{Arc, Mutex};
use bytes::Bytes;
use futures::channel::oneshot;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::ledger::{ApplyOutcome, Command};
use crate::machine::error::{ApplyError, ApplyResult};
use crate::machine::lifecycle::Lifecycle;
use crate::machine::machine::MachineState;
use crate::machine::position::{Admission, LogPosition};

// An in-flight unit of work: a committed entry sitting between submission
// and application. The `done` channel is resolved exactly once, either with
// the apply outcome or with an error.
pub(crate) struct PendingEntry {
    pub position: LogPosition,
    pub raw: Bytes,
    pub done: oneshot::Sender<ApplyResult>,
}

// The submission half of the apply pipeline. Entries go onto a bounded
// queue; a single worker task drains it in FIFO order. Because submission
// order equals commit order and there is exactly one worker, this is enough
// to guarantee in-order, one-at-a-time application without any locking
// inside the ledger's transition function.
pub(crate) struct ApplyQueue {
    tx: mpsc::Sender<PendingEntry>,
}

impl ApplyQueue {
    pub fn new(capacity: usize) -> (ApplyQueue, mpsc::Receiver<PendingEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ApplyQueue { tx }, rx)
    }

    // Attempts to enqueue an entry without ever blocking the caller. A full
    // queue is reported as backpressure immediately: the replication
    // engine's apply callback must not be stalled by a slow state machine.
    pub fn submit(
        &self,
        position: LogPosition,
        raw: Bytes,
    ) -> Result<oneshot::Receiver<ApplyResult>, ApplyError> {
        let (done, receiver) = oneshot::channel();
        let entry = PendingEntry {
            position,
            raw,
            done,
        };
        match self.tx.try_send(entry) {
            Ok(()) => Ok(receiver),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ApplyError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ApplyError::Closed),
        }
    }
}

// The single worker loop owning all ledger mutation. Runs until the
// shutdown signal fires, the queue is closed, or an ordering violation
// forces a halt; in every case the remaining queued entries are failed with
// `Closed` so no caller is left waiting forever.
pub(crate) async fn run_worker(
    name: String,
    mut queue: mpsc::Receiver<PendingEntry>,
    state: Arc<Mutex<MachineState>>,
    lifecycle: Arc<Lifecycle>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                Some(entry) => {
                    // A dequeued entry always runs to completion; the
                    // shutdown signal is only consulted between entries.
                    if !apply_one(&name, &state, &lifecycle, entry).await {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    queue.close();
    let mut cancelled = 0;
    while let Ok(entry) = queue.try_recv() {
        resolve(&name, entry.position, entry.done, Err(ApplyError::Closed));
        cancelled += 1;
    }
    if cancelled > 0 {
        debug!("[{}] cancelled {} queued entries on shutdown", name, cancelled);
    }
    debug!("[{}] apply worker stopped", name);
}

// Processes a single entry: decode, admit, apply, advance, resolve. Returns
// false if the worker must halt.
async fn apply_one(
    name: &str,
    state: &Arc<Mutex<MachineState>>,
    lifecycle: &Arc<Lifecycle>,
    entry: PendingEntry,
) -> bool {
    let PendingEntry {
        position,
        raw,
        done,
    } = entry;

    let command = match Command::decode(&raw) {
        Ok(command) => command,
        Err(e) => {
            debug!("[{}] entry at {} failed to decode: {}", name, position, e);
            resolve(name, position, done, Err(e.into()));
            return true;
        }
    };

    // Ledger mutation and the guard advance happen under one lock, so a
    // concurrent reader either sees both or neither.
    let mut locked = state.lock().await;
    match locked.guard.admit(position) {
        Admission::AlreadyApplied => {
            debug!(entry = %position, "[{}] entry already applied, discarding", name);
            resolve(name, position, done, Ok(ApplyOutcome::AlreadyApplied { position }));
            true
        }
        Admission::OutOfOrder { applied } => {
            error!(
                entry = %position,
                applied = %applied,
                "[{}] entry arrived out of order, halting: the commit stream guarantee is broken",
                name
            );
            lifecycle.close();
            resolve(name, position, done, Err(ApplyError::OutOfOrder { position, applied }));
            false
        }
        Admission::Gap { applied } => {
            error!(
                entry = %position,
                applied = %applied,
                "[{}] entry leaves a gap in its term, halting: the commit stream guarantee is broken",
                name
            );
            lifecycle.close();
            resolve(name, position, done, Err(ApplyError::OutOfOrder { position, applied }));
            false
        }
        Admission::Admit => {
            let outcome = locked.ledger.apply_command(&command);
            locked.guard.advance(position);
            debug!(entry = %position, "[{}] applied: {}", name, outcome);
            resolve(name, position, done, Ok(outcome));
            true
        }
    }
}

fn resolve(
    name: &str,
    position: LogPosition,
    done: oneshot::Sender<ApplyResult>,
    result: ApplyResult,
) {
    done.send(result)
        .map_err(|_| warn!("[{}] submitter of entry at {} no longer listening", name, position))
        .ok();
}
