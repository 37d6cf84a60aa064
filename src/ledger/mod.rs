mod account;
pub use account::{AccountLedger, ApplyOutcome};

mod command;
pub use command::{Command, DecodeError};
