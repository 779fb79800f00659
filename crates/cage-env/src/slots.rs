//! Write-once diagnostic slots
//!
//! The agent object, the environment and the helpers are published under
//! well-known names for inspection. Each name is bound once; rebinding it to
//! the same object is a no-op and to any other object is an error.

use crate::agent::AgentObject;
use crate::env::SandboxEnv;
use crate::error::{SandboxError, SandboxResult};
use crate::helpers::FixupHelpers;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
struct Slot<T> {
    name: &'static str,
    value: Mutex<Option<Arc<T>>>,
}

impl<T> Slot<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Mutex::new(None),
        }
    }

    fn bind(&self, value: &Arc<T>) -> SandboxResult<()> {
        let mut slot = self.value.lock();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, value) => Ok(()),
            Some(_) => {
                tracing::error!("overwriting {} is not allowed", self.name);
                Err(SandboxError::Slot(self.name))
            }
            None => {
                *slot = Some(Arc::clone(value));
                Ok(())
            }
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        self.value.lock().clone()
    }
}

/// Named, write-once bindings for inspection
#[derive(Debug)]
pub struct DiagnosticSlots {
    agent: Slot<AgentObject>,
    env: Slot<SandboxEnv>,
    helpers: Slot<FixupHelpers>,
}

impl Default for DiagnosticSlots {
    fn default() -> Self {
        Self {
            agent: Slot::new("window.pendo"),
            env: Slot::new("window.pendoEnv"),
            helpers: Slot::new("window.pendoFixupHelpers"),
        }
    }
}

impl DiagnosticSlots {
    /// Empty slots
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the agent object
    ///
    /// # Errors
    /// [`SandboxError::Slot`] if a different object is bound
    pub fn bind_agent(&self, agent: &Arc<AgentObject>) -> SandboxResult<()> {
        self.agent.bind(agent)
    }

    /// Bind the environment
    ///
    /// # Errors
    /// [`SandboxError::Slot`] if a different object is bound
    pub fn bind_env(&self, env: &Arc<SandboxEnv>) -> SandboxResult<()> {
        self.env.bind(env)
    }

    /// Bind the fixup helpers
    ///
    /// # Errors
    /// [`SandboxError::Slot`] if a different object is bound
    pub fn bind_helpers(&self, helpers: &Arc<FixupHelpers>) -> SandboxResult<()> {
        self.helpers.bind(helpers)
    }

    /// Bound agent object
    #[must_use]
    pub fn agent(&self) -> Option<Arc<AgentObject>> {
        self.agent.get()
    }

    /// Bound environment
    #[must_use]
    pub fn env(&self) -> Option<Arc<SandboxEnv>> {
        self.env.get()
    }

    /// Bound fixup helpers
    #[must_use]
    pub fn helpers(&self) -> Option<Arc<FixupHelpers>> {
        self.helpers.get()
    }
}
