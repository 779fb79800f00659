//! Global-context substitute
//!
//! Name lookups the agent makes on its global object resolve here. A fixed
//! set of names is overridden; the rest is forwarded to the host.

use crate::agent::AgentObject;
use crate::env::SandboxEnv;
use crate::ports::{HostProperty, HostWindow};
use crate::storage::{StorageArea, StorageFacade};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Host functions that only work when called on the host object
pub const BOUND_FUNCTIONS: [&str; 6] = [
    "addEventListener",
    "removeEventListener",
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
];

/// Names that resolve to nothing, forcing the agent onto the mediated transport
pub const HIDDEN_GLOBALS: [&str; 2] = ["fetch", "XMLHttpRequest"];

/// What a global name resolves to
#[derive(Debug, Clone)]
pub enum GlobalBinding {
    /// Deliberately absent
    Hidden,
    /// The agent's own global object
    Agent(Arc<AgentObject>),
    /// A location with the given host
    Location { host: String },
    /// Virtual storage
    Storage(StorageFacade),
    /// A navigator exposing only the user agent
    Navigator { user_agent: String },
    /// Host function called with the host as receiver
    BoundFunction(&'static str),
    /// Host function, forwarded as is
    Function,
    /// Host value
    Value(Value),
    /// Not defined on the host either
    Undefined,
}

/// Global object the agent is given
#[derive(Clone)]
pub struct SandboxGlobals {
    env: Arc<SandboxEnv>,
    host: Arc<dyn HostWindow>,
}

impl fmt::Debug for SandboxGlobals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxGlobals").finish_non_exhaustive()
    }
}

impl SandboxGlobals {
    /// Wrap the host global object
    #[must_use]
    pub fn new(env: Arc<SandboxEnv>, host: Arc<dyn HostWindow>) -> Self {
        Self { env, host }
    }

    /// Resolve a global name
    ///
    /// The first `location` read is the agent checking whether it runs on a
    /// staging host; it always gets an empty host so it never tries to load
    /// its staging build.
    #[must_use]
    pub fn get(&self, name: &str) -> GlobalBinding {
        if HIDDEN_GLOBALS.contains(&name) {
            return GlobalBinding::Hidden;
        }
        match name {
            "pendo" => return GlobalBinding::Agent(Arc::clone(self.env.agent())),
            "location" if self.env.take_first_location_read() => {
                return GlobalBinding::Location {
                    host: String::new(),
                }
            }
            "localStorage" => {
                return GlobalBinding::Storage(StorageFacade::new(
                    Arc::clone(&self.env),
                    StorageArea::Local,
                ))
            }
            "sessionStorage" => {
                return GlobalBinding::Storage(StorageFacade::new(
                    Arc::clone(&self.env),
                    StorageArea::Session,
                ))
            }
            "navigator" => {
                return GlobalBinding::Navigator {
                    user_agent: self.host.user_agent(),
                }
            }
            _ => {}
        }
        match self.host.property(name) {
            HostProperty::Function => BOUND_FUNCTIONS
                .iter()
                .find(|f| **f == name)
                .map_or(GlobalBinding::Function, |f| GlobalBinding::BoundFunction(f)),
            HostProperty::Value(value) => GlobalBinding::Value(value),
            HostProperty::Missing => GlobalBinding::Undefined,
        }
    }
}
