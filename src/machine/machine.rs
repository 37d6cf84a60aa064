use std::sync::Mutex as StdMutex;

use async_std::sync::{Arc, Mutex};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::oneshot;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ledger::{AccountLedger, Command};
use crate::machine::error::{ApplyError, ApplyResult, InitError, QueryError, SnapshotError};
use crate::machine::lifecycle::{IllegalTransition, Lifecycle, LifecycleState};
use crate::machine::pipeline::{ApplyQueue, PendingEntry, run_worker};
use crate::machine::position::{LogPosition, OrderingGuard};
use crate::machine::snapshot::{self, SnapshotOptions, SnapshotRecord, SnapshotStore};
use crate::machine::state_machine::{QueryOutcome, ReplicatedStateMachine};

// All state shared between the apply worker and the read path, guarded by a
// single lock so that the ledger balance and the applied position are always
// observed as a consistent pair.
pub(crate) struct MachineState {
    pub ledger: AccountLedger,
    pub guard: OrderingGuard,
}

impl MachineState {
    pub fn new() -> Self {
        MachineState {
            ledger: AccountLedger::new(),
            guard: OrderingGuard::new(),
        }
    }

    pub fn restore(record: &SnapshotRecord) -> Self {
        MachineState {
            ledger: AccountLedger::restore(record.balance),
            guard: OrderingGuard::restore(record.position),
        }
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct MachineOptions {
    // Used to disambiguate log statements between machines in one process.
    pub name: String,

    // Maximum number of in-flight entries before submissions start failing
    // with backpressure.
    pub queue_capacity: usize,

    pub snapshot: SnapshotOptions,
}

impl MachineOptions {
    pub fn new(name: &str, snapshot: SnapshotOptions) -> Self {
        MachineOptions {
            name: name.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            snapshot,
        }
    }
}

// The account-balance state machine handed to the replication engine. Wires
// together the bounded apply queue, the single worker that owns all ledger
// mutation, the lifecycle controller, and snapshot storage.
pub struct BalanceMachine {
    name: String,
    lifecycle: Arc<Lifecycle>,
    state: Arc<Mutex<MachineState>>,
    store: Arc<dyn SnapshotStore>,
    queue: ApplyQueue,

    // Consumed by initialize() when the worker is spawned.
    entries: StdMutex<Option<mpsc::Receiver<PendingEntry>>>,
    shutdown: watch::Sender<bool>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl BalanceMachine {
    pub async fn new(options: MachineOptions) -> Result<BalanceMachine, InitError> {
        let store = snapshot::new_store(&options.snapshot).await?;
        Ok(Self::with_store(options, store))
    }

    pub(crate) fn with_store(
        options: MachineOptions,
        store: Arc<dyn SnapshotStore>,
    ) -> BalanceMachine {
        let (queue, entries) = ApplyQueue::new(options.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        BalanceMachine {
            lifecycle: Arc::new(Lifecycle::new(&options.name)),
            name: options.name,
            state: Arc::new(Mutex::new(MachineState::new())),
            store,
            queue,
            entries: StdMutex::new(Some(entries)),
            shutdown,
            worker: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    // Places a committed entry on the apply queue without blocking. The
    // returned receiver resolves exactly once with the apply result; the
    // caller may await it or abandon it. Fails fast with Backpressure when
    // the queue is full.
    pub fn submit(
        &self,
        position: LogPosition,
        raw: Bytes,
    ) -> Result<oneshot::Receiver<ApplyResult>, ApplyError> {
        match self.lifecycle.current() {
            LifecycleState::Running => self.queue.submit(position, raw),
            LifecycleState::Closed => Err(ApplyError::Closed),
            other => Err(ApplyError::NotRunning(other)),
        }
    }

    async fn restore_and_start(&self) -> Result<(), InitError> {
        match self.store.load_latest().await? {
            Some(record) => {
                info!(
                    "[{}] restored snapshot at {} with balance {}",
                    self.name, record.position, record.balance
                );
                *self.state.lock().await = MachineState::restore(&record);
            }
            None => {
                info!("[{}] no snapshot found, starting from scratch", self.name);
            }
        }

        // The lifecycle permits exactly one pass through STARTING, so the
        // receiver is guaranteed to still be here.
        let entries = self
            .entries
            .lock()
            .expect("entries lock")
            .take()
            .expect("apply queue receiver already taken");
        let handle = tokio::spawn(run_worker(
            self.name.clone(),
            entries,
            self.state.clone(),
            self.lifecycle.clone(),
            self.shutdown.subscribe(),
        ));
        *self.worker.lock().expect("worker lock") = Some(handle);
        Ok(())
    }

    async fn query_at(
        &self,
        raw: Bytes,
        min_position: Option<LogPosition>,
    ) -> Result<QueryOutcome, QueryError> {
        let current = self.lifecycle.current();
        if !matches!(current, LifecycleState::Running | LifecycleState::Paused) {
            return Err(QueryError::NotRunning(current));
        }

        let command = Command::decode(&raw)?;
        if !command.is_read_only() {
            return Err(QueryError::NotReadOnly {
                op: command.op_name(),
            });
        }

        // Reads take the same lock as the apply worker rather than peeking
        // at the ledger lock-free, so a query issued after an entry's future
        // resolves is guaranteed to observe that entry.
        let locked = self.state.lock().await;
        let applied = locked.guard.applied();
        if let Some(min_position) = min_position {
            if applied < min_position {
                return Err(QueryError::NotCaughtUp {
                    applied,
                    min_position,
                });
            }
        }
        Ok(QueryOutcome {
            balance: locked.ledger.balance(),
            position: applied,
        })
    }
}

#[async_trait]
impl ReplicatedStateMachine for BalanceMachine {
    async fn initialize(&self) -> Result<(), InitError> {
        self.lifecycle.transition(LifecycleState::Starting)?;
        match self.restore_and_start().await {
            Ok(()) => {
                self.lifecycle.transition(LifecycleState::Running)?;
                Ok(())
            }
            Err(e) => {
                // A machine that failed to restore must never apply entries:
                // it would diverge from replicas that restored correctly.
                self.lifecycle.close();
                Err(e)
            }
        }
    }

    async fn apply_entry(&self, position: LogPosition, raw: Bytes) -> ApplyResult {
        let receiver = self.submit(position, raw)?;
        // The worker resolving the entry can only drop the sender if the
        // machine shut down before getting to it.
        receiver.await.unwrap_or(Err(ApplyError::Closed))
    }

    async fn query(&self, raw: Bytes) -> Result<QueryOutcome, QueryError> {
        self.query_at(raw, None).await
    }

    async fn query_stale(
        &self,
        raw: Bytes,
        min_position: LogPosition,
    ) -> Result<QueryOutcome, QueryError> {
        self.query_at(raw, Some(min_position)).await
    }

    async fn take_snapshot(&self) -> Result<LogPosition, SnapshotError> {
        let current = self.lifecycle.current();
        if !matches!(current, LifecycleState::Running | LifecycleState::Paused) {
            return Err(SnapshotError::NotRunning(current));
        }

        // Capture the pair under the state lock so the snapshot never holds
        // a balance from one position and a position from another.
        let record = {
            let locked = self.state.lock().await;
            SnapshotRecord {
                position: locked.guard.applied(),
                balance: locked.ledger.balance(),
            }
        };
        self.store.save(&record).await?;
        info!(
            "[{}] took snapshot at {} with balance {}",
            self.name, record.position, record.balance
        );
        Ok(record.position)
    }

    async fn last_applied(&self) -> LogPosition {
        self.state.lock().await.guard.applied()
    }

    fn pause(&self) -> Result<(), IllegalTransition> {
        self.lifecycle.transition(LifecycleState::Paused)
    }

    fn resume(&self) -> Result<(), IllegalTransition> {
        self.lifecycle.transition(LifecycleState::Running)
    }

    async fn close(&self) {
        self.lifecycle.close();
        self.shutdown.send(true).ok();

        let handle = self.worker.lock().expect("worker lock").take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| warn!("[{}] apply worker did not stop cleanly: {}", self.name, e))
                .ok();
        }
        info!("[{}] closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ApplyOutcome;
    use crate::machine::testing;

    fn raw(text: &str) -> Bytes {
        Bytes::from(text.to_string())
    }

    #[tokio::test]
    async fn test_submit_before_initialize_is_rejected() {
        let machine = BalanceMachine::new(testing::memory_options("test"))
            .await
            .unwrap();
        assert_eq!(
            machine.submit(LogPosition::new(1, 1), raw("CREDIT:1")).err(),
            Some(ApplyError::NotRunning(LifecycleState::Uninitialized))
        );
    }

    #[tokio::test]
    async fn test_initialize_twice_is_rejected() {
        let machine = BalanceMachine::new(testing::memory_options("test"))
            .await
            .unwrap();
        machine.initialize().await.unwrap();
        assert!(matches!(
            machine.initialize().await,
            Err(InitError::Lifecycle(_))
        ));
        machine.close().await;
    }

    #[tokio::test]
    async fn test_initialize_failure_closes_the_machine() {
        let machine =
            testing::machine_with_store("test", Arc::new(testing::FailingSnapshotStore));
        assert!(matches!(
            machine.initialize().await,
            Err(InitError::Restore(_))
        ));
        assert_eq!(machine.lifecycle_state(), LifecycleState::Closed);
        assert_eq!(
            machine
                .apply_entry(LogPosition::new(1, 1), raw("CREDIT:1"))
                .await,
            Err(ApplyError::Closed)
        );
    }

    #[tokio::test]
    async fn test_pause_rejects_submissions_but_serves_queries() {
        let machine = testing::running_machine("test").await;
        machine
            .apply_entry(LogPosition::new(1, 1), raw("CREDIT:100"))
            .await
            .unwrap();

        machine.pause().unwrap();
        assert_eq!(
            machine.submit(LogPosition::new(1, 2), raw("CREDIT:1")).err(),
            Some(ApplyError::NotRunning(LifecycleState::Paused))
        );

        let outcome = machine.query(raw("GET_BALANCE")).await.unwrap();
        assert_eq!(outcome.balance, 100.0);
        assert_eq!(outcome.position, LogPosition::new(1, 1));

        machine.resume().unwrap();
        assert_eq!(
            machine
                .apply_entry(LogPosition::new(1, 2), raw("CREDIT:1"))
                .await,
            Ok(ApplyOutcome::Credited { balance: 101.0 })
        );
        machine.close().await;
    }

    #[tokio::test]
    async fn test_query_rejects_mutating_commands() {
        let machine = testing::running_machine("test").await;
        assert_eq!(
            machine.query(raw("CREDIT:5")).await,
            Err(QueryError::NotReadOnly { op: "CREDIT" })
        );
        machine.close().await;
    }

    #[tokio::test]
    async fn test_everything_fails_fast_after_close() {
        let machine = testing::running_machine("test").await;
        machine.close().await;

        assert_eq!(
            machine
                .apply_entry(LogPosition::new(1, 1), raw("CREDIT:1"))
                .await,
            Err(ApplyError::Closed)
        );
        assert_eq!(
            machine.query(raw("GET_BALANCE")).await,
            Err(QueryError::NotRunning(LifecycleState::Closed))
        );
        assert!(matches!(
            machine.take_snapshot().await,
            Err(SnapshotError::NotRunning(LifecycleState::Closed))
        ));
        assert!(machine.pause().is_err());

        // Closing again is a harmless no-op.
        machine.close().await;
    }
}
