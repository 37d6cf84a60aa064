use std::fmt;

use crate::ledger::Command;
use crate::machine::LogPosition;

// The mutable account state this state machine replicates. All mutation goes
// through the apply pipeline's single worker, so the transition function
// itself needs no internal locking.
pub struct AccountLedger {
    balance: f64,
}

// The outcome of applying a single committed command. Every variant carries
// enough information to render the human-readable response payload sent back
// to the submitting client. Note that an insufficient-funds debit is a normal
// outcome, not a fault: every replica computes the identical outcome from
// identical state.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Credited { balance: f64 },
    Debited { balance: f64 },
    InsufficientFunds { balance: f64 },
    Balance { balance: f64 },

    // Produced by the apply pipeline (never by the ledger itself) when an
    // entry at or below the applied position is redelivered.
    AlreadyApplied { position: LogPosition },
}

impl AccountLedger {
    pub fn new() -> Self {
        AccountLedger { balance: 0.0 }
    }

    // Returns a ledger whose balance is taken from a snapshot rather than
    // starting from zero.
    pub fn restore(balance: f64) -> Self {
        AccountLedger { balance }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    // Applies a single decoded command. This function is total and
    // deterministic: for a given starting balance and command, the outcome
    // and the ending balance are uniquely determined. A debit that would
    // drive the balance negative leaves it unchanged.
    pub fn apply_command(&mut self, command: &Command) -> ApplyOutcome {
        match command {
            Command::Credit(amount) => {
                self.balance += amount;
                ApplyOutcome::Credited {
                    balance: self.balance,
                }
            }
            Command::Debit(amount) => {
                if self.balance >= *amount {
                    self.balance -= amount;
                    ApplyOutcome::Debited {
                        balance: self.balance,
                    }
                } else {
                    ApplyOutcome::InsufficientFunds {
                        balance: self.balance,
                    }
                }
            }
            Command::GetBalance => ApplyOutcome::Balance {
                balance: self.balance,
            },
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::Credited { balance } => {
                write!(f, "CREDIT applied, balance is {}", balance)
            }
            ApplyOutcome::Debited { balance } => {
                write!(f, "DEBIT applied, balance is {}", balance)
            }
            ApplyOutcome::InsufficientFunds { balance } => {
                write!(f, "insufficient funds, balance is {}", balance)
            }
            ApplyOutcome::Balance { balance } => write!(f, "current balance is {}", balance),
            ApplyOutcome::AlreadyApplied { position } => {
                write!(f, "entry at {} already applied", position)
            }
        }
    }
}
