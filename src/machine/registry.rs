use std::collections::HashMap;
use std::sync::Mutex;

use async_std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::machine::machine::BalanceMachine;
use crate::machine::state_machine::ReplicatedStateMachine;

// An explicit registry of the machines a process hosts, keyed by machine
// name. Whoever constructs machines owns the registry and its lifetime;
// there is deliberately no process-wide ambient cache of instances.
pub struct MachineRegistry {
    machines: Mutex<HashMap<String, Arc<BalanceMachine>>>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("a machine named {0:?} is already registered")]
    DuplicateName(String),
}

impl MachineRegistry {
    pub fn new() -> Self {
        MachineRegistry {
            machines: Mutex::new(HashMap::new()),
        }
    }

    // Adds a machine under its own name. Names are unique; registering a
    // second machine under an existing name is rejected rather than
    // replacing the first.
    pub fn register(&self, machine: Arc<BalanceMachine>) -> Result<(), RegistryError> {
        let name = machine.name().to_string();
        let mut machines = self.machines.lock().expect("registry lock");
        if machines.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        machines.insert(name, machine);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<BalanceMachine>> {
        self.machines.lock().expect("registry lock").get(name).cloned()
    }

    // Removes and returns the machine, leaving its lifecycle untouched. The
    // caller decides whether to close it.
    pub fn remove(&self, name: &str) -> Option<Arc<BalanceMachine>> {
        self.machines.lock().expect("registry lock").remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.machines
            .lock()
            .expect("registry lock")
            .keys()
            .cloned()
            .collect()
    }

    // Closes every registered machine and empties the registry.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<BalanceMachine>> = {
            let mut machines = self.machines.lock().expect("registry lock");
            machines.drain().map(|(_, machine)| machine).collect()
        };
        let count = drained.len();
        for machine in drained {
            machine.close().await;
        }
        if count > 0 {
            info!("closed {} registered machines", count);
        }
    }
}

impl Default for MachineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
