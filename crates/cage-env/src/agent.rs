//! The agent's global object
//!
//! Until the agent script runs, calls made on its global object are queued,
//! `initialize` first. The object also tracks which fields it holds, so that
//! a server response cannot silently overwrite one.

use crate::hooks::InitializeHooks;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Methods the stub queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentMethod {
    Initialize,
    Identify,
    UpdateOptions,
    PageLoad,
    Track,
}

impl AgentMethod {
    /// Name as the agent knows it
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Identify => "identify",
            Self::UpdateOptions => "updateOptions",
            Self::PageLoad => "pageLoad",
            Self::Track => "track",
        }
    }
}

/// One queued call
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCall {
    pub method: AgentMethod,
    pub args: Vec<Value>,
}

/// Fields present on a fresh agent object
const STUB_FIELDS: [&str; 11] = [
    "_q",
    "initialize",
    "identify",
    "updateOptions",
    "pageLoad",
    "track",
    "_",
    "dom",
    "compress",
    "VERSION",
    "apiKey",
];

/// Fields the agent installs on its global object when its script runs
pub const AGENT_FIELDS: [&str; 18] = [
    "ajax",
    "events",
    "guides",
    "location",
    "getVisitorId",
    "getAccountId",
    "getCurrentUrl",
    "isReady",
    "flushNow",
    "showGuideById",
    "startGuides",
    "stopGuides",
    "loadGuides",
    "validateInstall",
    "getVersion",
    "enableDebugging",
    "disableDebugging",
    "Sizzle",
];

/// The agent's global object
pub struct AgentObject {
    queue: Mutex<VecDeque<AgentCall>>,
    fields: Mutex<BTreeSet<String>>,
    hooks: Mutex<Option<Arc<InitializeHooks>>>,
}

impl fmt::Debug for AgentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentObject")
            .field("queued", &self.queue.lock().len())
            .field("fields", &self.fields.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for AgentObject {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fields: Mutex::new(STUB_FIELDS.iter().map(|s| (*s).to_string()).collect()),
            hooks: Mutex::new(None),
        }
    }
}

impl AgentObject {
    /// Create a fresh stub
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `initialize`, ahead of everything else
    pub fn initialize(&self, params: Value, hooks: Option<Arc<InitializeHooks>>) {
        if let Some(hooks) = hooks {
            *self.hooks.lock() = Some(hooks);
        }
        self.queue.lock().push_front(AgentCall {
            method: AgentMethod::Initialize,
            args: vec![params],
        });
    }

    /// Queue `identify`
    pub fn identify(&self, args: Vec<Value>) {
        self.enqueue(AgentMethod::Identify, args);
    }

    /// Queue `updateOptions`
    pub fn update_options(&self, args: Vec<Value>) {
        self.enqueue(AgentMethod::UpdateOptions, args);
    }

    /// Queue `pageLoad`
    pub fn page_load(&self, args: Vec<Value>) {
        self.enqueue(AgentMethod::PageLoad, args);
    }

    /// Queue `track`
    pub fn track(&self, args: Vec<Value>) {
        self.enqueue(AgentMethod::Track, args);
    }

    fn enqueue(&self, method: AgentMethod, args: Vec<Value>) {
        self.queue.lock().push_back(AgentCall { method, args });
    }

    /// Copy of the queue, front first
    #[must_use]
    pub fn queued(&self) -> Vec<AgentCall> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Hand the object over to the running agent
    ///
    /// Records the fields the agent installs and returns the queued calls,
    /// front first, for the agent to replay.
    pub fn take_over<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Vec<AgentCall> {
        self.fields.lock().extend(fields.into_iter().map(str::to_string));
        self.queue.lock().drain(..).collect()
    }

    /// Hooks passed to `initialize`
    #[must_use]
    pub fn hooks(&self) -> Option<Arc<InitializeHooks>> {
        self.hooks.lock().clone()
    }

    /// Whether the object holds a field
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.lock().contains(name)
    }
}
