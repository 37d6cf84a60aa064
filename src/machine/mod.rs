mod error;
pub use error::{ApplyError, ApplyResult, InitError, QueryError, SnapshotError};

mod lifecycle;
pub use lifecycle::{IllegalTransition, LifecycleState};

mod machine;
pub use machine::{BalanceMachine, MachineOptions};

mod pipeline;

mod position;
pub use position::LogPosition;

mod registry;
pub use registry::{MachineRegistry, RegistryError};

mod snapshot;
pub use snapshot::{SnapshotOptions, SnapshotRecord};

mod state_machine;
pub use state_machine::{QueryOutcome, ReplicatedStateMachine};

#[cfg(test)]
pub mod testing;
