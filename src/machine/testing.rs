use async_std::sync::Arc;
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use crate::machine::error::SnapshotError;
use crate::machine::machine::{BalanceMachine, MachineOptions};
use crate::machine::snapshot::{SnapshotOptions, SnapshotRecord, SnapshotStore};
use crate::machine::state_machine::ReplicatedStateMachine;

// Installs a fmt subscriber honoring RUST_LOG so test runs can be debugged
// with full tracing output. Safe to call from every test; only the first
// call wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub fn memory_options(name: &str) -> MachineOptions {
    MachineOptions::new(name, SnapshotOptions::InMemoryForTesting)
}

// Returns a machine that has already been initialized into RUNNING, backed
// by in-memory snapshot storage.
pub async fn running_machine(name: &str) -> BalanceMachine {
    let machine = BalanceMachine::new(memory_options(name))
        .await
        .expect("create machine");
    machine.initialize().await.expect("initialize machine");
    machine
}

pub fn machine_with_store(name: &str, store: Arc<dyn SnapshotStore>) -> BalanceMachine {
    BalanceMachine::with_store(memory_options(name), store)
}

// A store whose reads always fail, for exercising the initialization
// failure path.
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save(&self, _record: &SnapshotRecord) -> Result<(), SnapshotError> {
        Err(SnapshotError::Corrupt("failing store".to_string()))
    }

    async fn load_latest(&self) -> Result<Option<SnapshotRecord>, SnapshotError> {
        Err(SnapshotError::Corrupt("failing store".to_string()))
    }
}
