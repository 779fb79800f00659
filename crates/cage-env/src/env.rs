//! The sandbox environment
//!
//! One [`SandboxEnv`] exists per loaded agent and every capability handed to
//! the agent holds a reference to it. All mutable state sits behind a single
//! mutex that is never held across an await point.

use crate::agent::AgentObject;
use crate::compression::CompressionMap;
use crate::config::SandboxSettings;
use crate::error::{SandboxError, SandboxResult};
use crate::library::LibraryState;
use crate::ports::Fetcher;
use crate::storage::{StorageArea, VirtualStore};
use cage_filter::{
    is_transmission_allowed, Clock, Enforcement, FilterContext, FilterResult, Transmission,
    TransmissionLog,
};
use cage_parser::AgentConfig;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// The agent release the fixup tables were written against
pub const EXPECTED_AGENT_VERSION: &str = "2.117.0_prod";

/// Nesting depth at which the instrumented iterator fails
pub const RECURSION_LIMIT: usize = 150;

#[derive(Debug)]
pub(crate) struct EnvState {
    pub(crate) config: AgentConfig,
    pub(crate) api_key: Option<String>,
    pub(crate) version: Option<String>,
    pub(crate) compression: CompressionMap,
    pub(crate) turn: u64,
    pub(crate) recursion_depth: usize,
    pub(crate) library: LibraryState,
    pub(crate) store: VirtualStore,
    pub(crate) transmissions: TransmissionLog,
    pub(crate) saw_first_script: bool,
    pub(crate) saw_first_location: bool,
}

/// Per-sandbox context shared by every capability
pub struct SandboxEnv {
    state: Mutex<EnvState>,
    enforcement: Enforcement,
    ct_epsilon_ms: i64,
    clock: Arc<dyn Clock>,
    fetcher: Arc<dyn Fetcher>,
    agent: Arc<AgentObject>,
}

impl fmt::Debug for SandboxEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxEnv")
            .field("enforcement", &self.enforcement)
            .field("ct_epsilon_ms", &self.ct_epsilon_ms)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl SandboxEnv {
    /// Create a sandbox
    #[must_use]
    pub fn new(
        settings: &SandboxSettings,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EnvState {
                config: AgentConfig::new(),
                api_key: None,
                version: None,
                compression: CompressionMap::default(),
                turn: 0,
                recursion_depth: 0,
                library: LibraryState::default(),
                store: VirtualStore::new(),
                transmissions: TransmissionLog::with_capacity(settings.transmission_capacity),
                saw_first_script: false,
                saw_first_location: false,
            }),
            enforcement: settings.enforcement,
            ct_epsilon_ms: settings.ct_epsilon_ms,
            clock,
            fetcher,
            agent: Arc::new(AgentObject::new()),
        })
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut EnvState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Enforcement mode
    #[inline]
    #[must_use]
    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    /// Whether violations are fatal
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.enforcement.is_sealed()
    }

    /// Pass a check through the enforcement mode
    ///
    /// # Errors
    /// The check's error, when sealed
    pub fn enforce(&self, result: FilterResult<()>, what: &str) -> SandboxResult<()> {
        Ok(self.enforcement.enforce(result, what)?)
    }

    /// The agent's global object
    #[inline]
    #[must_use]
    pub fn agent(&self) -> &Arc<AgentObject> {
        &self.agent
    }

    /// Host network port
    #[inline]
    #[must_use]
    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Current time in milliseconds
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Install the merged agent configuration
    pub fn set_config(&self, config: AgentConfig) {
        self.with_state(|s| s.config = config);
    }

    /// Merged agent configuration
    #[must_use]
    pub fn config(&self) -> AgentConfig {
        self.with_state(|s| s.config.clone())
    }

    /// Record the agent version
    ///
    /// # Errors
    /// [`SandboxError::WriteOnce`] if a different version was already set
    pub fn set_version(&self, value: &str) -> SandboxResult<()> {
        self.with_state(|s| write_once(&mut s.version, value, "VERSION"))?;
        Ok(())
    }

    /// Agent version, once set
    #[must_use]
    pub fn version(&self) -> Option<String> {
        self.with_state(|s| s.version.clone())
    }

    /// Record the api key
    ///
    /// # Errors
    /// [`SandboxError::WriteOnce`] if a different key was already set
    pub fn set_api_key(&self, value: &str) -> SandboxResult<()> {
        self.with_state(|s| write_once(&mut s.api_key, value, "apiKey"))?;
        Ok(())
    }

    /// Api key, once set
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.with_state(|s| s.api_key.clone())
    }

    /// Current scheduler turn
    #[must_use]
    pub fn turn(&self) -> u64 {
        self.with_state(|s| s.turn)
    }

    /// Start the next scheduler turn, forgetting last turn's compression tokens
    pub fn advance_turn(&self) {
        let evicted = self.with_state(|s| {
            s.turn += 1;
            let turn = s.turn;
            s.compression.evict_before(turn)
        });
        if evicted > 0 {
            tracing::debug!("evicted {} compression tokens", evicted);
        }
    }

    /// Remember a payload under its compression token for this turn
    pub fn remember_compressed(&self, token: impl Into<String>, payload: Value) {
        self.with_state(|s| {
            let turn = s.turn;
            s.compression.remember(token.into(), payload, turn);
        });
    }

    /// Payload behind a compression token made this turn
    #[must_use]
    pub fn compressed(&self, token: &str) -> Option<Value> {
        self.with_state(|s| s.compression.get(token, s.turn))
    }

    /// Run the agent's compressor and remember the result
    pub fn compress(&self, payload: &Value, compressor: impl FnOnce(&Value) -> String) -> String {
        let token = compressor(payload);
        self.remember_compressed(token.clone(), payload.clone());
        token
    }

    /// Enter one level of the instrumented iterator
    ///
    /// # Errors
    /// Capability violation at [`RECURSION_LIMIT`] levels
    pub fn enter_recursion(&self) -> SandboxResult<RecursionGuard<'_>> {
        self.with_state(|s| {
            if s.recursion_depth + 1 >= RECURSION_LIMIT {
                return Err(SandboxError::capability("_.each() recursion too deep"));
            }
            s.recursion_depth += 1;
            Ok(())
        })?;
        Ok(RecursionGuard { env: self })
    }

    /// Current iterator nesting depth
    #[must_use]
    pub fn recursion_depth(&self) -> usize {
        self.with_state(|s| s.recursion_depth)
    }

    /// Read from virtual storage
    #[must_use]
    pub fn storage_get(&self, area: StorageArea, key: &str) -> Option<String> {
        self.with_state(|s| s.store.get(area, key).map(str::to_string))
    }

    /// Write to virtual storage
    pub fn storage_set(&self, area: StorageArea, key: &str, value: &str) {
        self.with_state(|s| s.store.set(area, key, value));
    }

    /// Delete from virtual storage
    pub fn storage_remove(&self, area: StorageArea, key: &str) {
        self.with_state(|s| s.store.remove(area, key));
    }

    /// Filter context for the current state and time
    #[must_use]
    pub fn filter_context(&self) -> FilterContext {
        let now = self.now_millis();
        self.with_state(|s| {
            FilterContext::from_config(&s.config)
                .with_api_key(s.api_key.clone())
                .with_version(s.version.clone())
                .with_ct_epsilon(self.ct_epsilon_ms)
                .at(now)
        })
    }

    /// Run the request allow-list, recording allowed telemetry
    ///
    /// # Errors
    /// The filter's denial, regardless of mode
    pub fn check_transmission(
        &self,
        url: &Url,
        payload: Option<&Value>,
        integrity: Option<&str>,
    ) -> FilterResult<()> {
        let ctx = self.filter_context();
        self.with_state(|s| is_transmission_allowed(url, payload, integrity, &ctx, &mut s.transmissions))
    }

    /// Read-only copy of the recent transmissions, oldest first
    #[must_use]
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.with_state(|s| s.transmissions.snapshot())
    }

    /// True exactly once: for the first script element the agent creates
    pub(crate) fn take_first_script_probe(&self) -> bool {
        self.with_state(|s| !std::mem::replace(&mut s.saw_first_script, true))
    }

    /// True exactly once: for the first location read
    pub(crate) fn take_first_location_read(&self) -> bool {
        self.with_state(|s| !std::mem::replace(&mut s.saw_first_location, true))
    }
}

fn write_once(slot: &mut Option<String>, value: &str, name: &'static str) -> SandboxResult<()> {
    match slot.as_deref() {
        Some(current) if !current.is_empty() && current != value => {
            tracing::error!("only expected {} to be set once", name);
            Err(SandboxError::WriteOnce(name))
        }
        current => {
            if name == "VERSION"
                && current.map_or(true, str::is_empty)
                && value != EXPECTED_AGENT_VERSION
            {
                tracing::warn!("unexpected agent version {}; it may break in very unexpected ways", value);
            }
            *slot = Some(value.to_string());
            Ok(())
        }
    }
}

/// One level of iterator nesting; leaving the level on drop
#[derive(Debug)]
pub struct RecursionGuard<'a> {
    env: &'a SandboxEnv,
}

impl Drop for RecursionGuard<'_> {
    fn drop(&mut self) {
        self.env.with_state(|s| s.recursion_depth = s.recursion_depth.saturating_sub(1));
    }
}
