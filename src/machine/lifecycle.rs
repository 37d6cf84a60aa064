use std::fmt;
use std::sync::Mutex;

use thiserror::Error;
use tracing::info;

// Explicit lifecycle states governing which operations are legal on the
// state machine:
//
//   UNINITIALIZED -> STARTING -> RUNNING <-> PAUSED -> CLOSED
//
// CLOSED is terminal and reachable from every other state, so that shutdown
// (including shutdown forced by a protocol violation) always succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Running,
    Paused,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal lifecycle transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

pub struct Lifecycle {
    name: String,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new(name: &str) -> Self {
        Lifecycle {
            name: name.to_string(),
            state: Mutex::new(LifecycleState::Uninitialized),
        }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.lock().expect("lifecycle lock")
    }

    // Moves to the supplied state if the transition is part of the lifecycle
    // graph, rejecting everything else.
    pub fn transition(&self, to: LifecycleState) -> Result<(), IllegalTransition> {
        let mut state = self.state.lock().expect("lifecycle lock");
        let from = *state;
        if !allowed(from, to) {
            return Err(IllegalTransition { from, to });
        }
        *state = to;
        info!("[{}] lifecycle transition {} -> {}", self.name, from, to);
        Ok(())
    }

    // Moves to CLOSED from whatever state we're in. Returns false if the
    // lifecycle was already closed, making shutdown idempotent.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock().expect("lifecycle lock");
        if *state == LifecycleState::Closed {
            return false;
        }
        let from = *state;
        *state = LifecycleState::Closed;
        info!("[{}] lifecycle transition {} -> CLOSED", self.name, from);
        true
    }
}

fn allowed(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Uninitialized, Starting)
            | (Starting, Running)
            | (Running, Paused)
            | (Paused, Running)
            | (Uninitialized | Starting | Running | Paused, Closed)
    )
}
