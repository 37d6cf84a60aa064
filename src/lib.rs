// A replicated state machine core for an account ledger. The consensus
// engine in front of this crate owns leader election, log replication and
// transport; this crate owns deterministic application of committed entries,
// consistent reads, and snapshot capture/restore.

pub mod ledger;
pub mod machine;


pub use ledger::{AccountLedger, ApplyOutcome, Command, DecodeError};
pub use machine::{
    ApplyError, ApplyResult, BalanceMachine, IllegalTransition, InitError, LifecycleState,
    LogPosition, MachineOptions, MachineRegistry, QueryError, QueryOutcome, RegistryError,
    ReplicatedStateMachine, SnapshotError, SnapshotOptions, SnapshotRecord,
};
