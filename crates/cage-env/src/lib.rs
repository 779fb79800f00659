//! Agent Cage Environment
//!
//! The capability-mediated environment an untrusted telemetry agent runs in.
//! One [`SandboxEnv`] per agent owns all sandbox state; everything the agent
//! can reach is a substitute that consults it:
//!
//! - [`SandboxDocument`] and [`SandboxGlobals`] stand in for the document and
//!   the global object
//! - [`filtered_fetch`] and the request objects built on it are the only way
//!   out to the network
//! - [`InstrumentedLibrary`] wraps the agent's utility library
//! - [`FixupHelpers`] are what the patched agent code calls into
//!
//! [`arm_agent`] ties it together: fetch, validate, rewrite, load, initialize.
//! The host is reached through the ports in [`ports`].

#![warn(unreachable_pub)]

mod agent;
mod compression;
mod config;
mod document;
mod env;
mod error;
mod globals;
mod helpers;
mod hooks;
mod library;
pub mod ports;
mod slots;
mod storage;
mod stub;
mod tables;
mod transport;

pub use agent::{AgentCall, AgentMethod, AgentObject, AGENT_FIELDS};
pub use config::{SandboxConfig, SandboxSettings, DEFAULT_AGENT_CDN};
pub use document::{ElementHandle, SandboxDocument};
pub use env::{RecursionGuard, SandboxEnv, EXPECTED_AGENT_VERSION, RECURSION_LIMIT};
pub use error::{ConfigError, FetchError, SandboxError, SandboxResult};
pub use globals::{GlobalBinding, SandboxGlobals, BOUND_FUNCTIONS, HIDDEN_GLOBALS};
pub use helpers::{make_fixup_helpers, FixupHelpers, HelperFactory, HELPER_NAMES};
pub use hooks::{
    EventHook, InitializeHooks, LifecycleEvent, LifecycleEvents, SignatureValidator, UrlSanitizer,
};
pub use library::{
    InstrumentedLibrary, Iteratee, JsonUtilityLibrary, KeyList, ReduceSource, Reducer,
    UtilityLibrary, KEYS_MEMO_CAPACITY,
};
pub use ports::{
    Credentials, FetchRequest, FetchResponse, Fetcher, HostDocument, HostElement, HostProperty,
    HostWindow, LoadRequest, RequestMode, ScriptLoader,
};
pub use slots::DiagnosticSlots;
pub use storage::{StorageArea, StorageFacade, VirtualStore};
pub use stub::{arm_agent, ArmedAgent, LoadState, SandboxHost, VisitorIdResolver};
pub use tables::{known_fixup_tables, AGENT_2_117_0_BODY};
pub use transport::{
    filtered_ajax, filtered_fetch, AjaxRequest, AjaxResponse, Beacon, BeaconOutcome,
    MediatedRequest, DONE,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
