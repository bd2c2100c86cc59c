//! Application lifecycle states.
//!
//! ```text
//! Unloaded → Deploying → Running → Undeploying → Unloaded
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LifecycleState {
    Unloaded = 0,
    Deploying = 1,
    Running = 2,
    Undeploying = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LifecycleState::Deploying,
            2 => LifecycleState::Running,
            3 => LifecycleState::Undeploying,
            _ => LifecycleState::Unloaded,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Deploying => "deploying",
            LifecycleState::Running => "running",
            LifecycleState::Undeploying => "undeploying",
        };
        f.write_str(name)
    }
}

/// Atomically readable lifecycle state.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}
