//! Arming the agent
//!
//! [`arm_agent`] builds a sandbox, fetches and rewrites the agent release
//! in the background and hands it to the host's script loader. The agent is
//! initialized once it has loaded and the caller has delivered a visitor id,
//! in whichever order those happen.

use crate::config::SandboxSettings;
use crate::document::SandboxDocument;
use crate::env::SandboxEnv;
use crate::error::{SandboxError, SandboxResult};
use crate::globals::SandboxGlobals;
use crate::agent::AGENT_FIELDS;
use crate::helpers::HelperFactory;
use crate::hooks::{InitializeHooks, LifecycleEvent};
use crate::ports::{FetchRequest, Fetcher, HostDocument, HostWindow, LoadRequest, ScriptLoader};
use crate::slots::DiagnosticSlots;
use crate::tables::known_fixup_tables;
use crate::transport::{Beacon, MediatedRequest};
use cage_filter::{Clock, SystemClock};
use cage_parser::{parse_agent, AgentConfig, FixupTables};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use url::Url;

/// Everything the sandbox needs from its host
#[derive(Clone)]
pub struct SandboxHost {
    fetcher: Arc<dyn Fetcher>,
    loader: Arc<dyn ScriptLoader>,
    document: Arc<dyn HostDocument>,
    window: Arc<dyn HostWindow>,
    clock: Arc<dyn Clock>,
    settings: SandboxSettings,
    tables: Arc<FixupTables<HelperFactory>>,
}

impl fmt::Debug for SandboxHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHost")
            .field("settings", &self.settings)
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

impl SandboxHost {
    /// Host with the system clock, default settings and the known releases
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        loader: Arc<dyn ScriptLoader>,
        document: Arc<dyn HostDocument>,
        window: Arc<dyn HostWindow>,
    ) -> Self {
        Self {
            fetcher,
            loader,
            document,
            window,
            clock: Arc::new(SystemClock),
            settings: SandboxSettings::default(),
            tables: Arc::new(known_fixup_tables()),
        }
    }

    /// Use a different clock
    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use different settings
    #[inline]
    #[must_use]
    pub fn with_settings(mut self, settings: SandboxSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Accept a different set of releases
    #[inline]
    #[must_use]
    pub fn with_tables(mut self, tables: FixupTables<HelperFactory>) -> Self {
        self.tables = Arc::new(tables);
        self
    }
}

/// Progress of an armed agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Still loading or waiting for a visitor id
    Pending,
    /// `initialize` has been queued
    Initialized,
    /// Loading failed; the agent will never initialize
    Failed(String),
    /// The visitor id resolver was dropped unused
    Abandoned,
}

/// Handle to a sandboxed agent
#[derive(Debug)]
pub struct ArmedAgent {
    env: Arc<SandboxEnv>,
    slots: Arc<DiagnosticSlots>,
    document: SandboxDocument,
    globals: SandboxGlobals,
    state: watch::Receiver<LoadState>,
}

impl ArmedAgent {
    /// The sandbox environment
    #[inline]
    #[must_use]
    pub fn env(&self) -> &Arc<SandboxEnv> {
        &self.env
    }

    /// Diagnostic bindings
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &Arc<DiagnosticSlots> {
        &self.slots
    }

    /// Document the agent is given
    #[must_use]
    pub fn document(&self) -> SandboxDocument {
        self.document.clone()
    }

    /// Global object the agent is given
    #[must_use]
    pub fn globals(&self) -> SandboxGlobals {
        self.globals.clone()
    }

    /// A fresh XHR-style request object
    #[must_use]
    pub fn request(&self) -> MediatedRequest {
        MediatedRequest::new(Arc::clone(&self.env))
    }

    /// A fresh beacon
    #[must_use]
    pub fn beacon(&self) -> Beacon {
        Beacon::new(Arc::clone(&self.env))
    }

    /// Current progress
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Wait until the agent is initialized
    ///
    /// # Errors
    /// [`SandboxError::Load`] if loading failed, [`SandboxError::Abandoned`]
    /// if no visitor id will ever arrive
    pub async fn initialized(&self) -> SandboxResult<()> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| *s != LoadState::Pending)
            .await
            .map(|s| s.clone())
            .unwrap_or(LoadState::Abandoned);
        match settled {
            LoadState::Initialized => Ok(()),
            LoadState::Failed(message) => Err(SandboxError::Load(message)),
            LoadState::Pending | LoadState::Abandoned => Err(SandboxError::Abandoned),
        }
    }
}

/// Delivers the visitor id; single-shot
#[derive(Debug)]
pub struct VisitorIdResolver {
    sender: Mutex<Option<oneshot::Sender<String>>>,
}

impl VisitorIdResolver {
    /// Deliver the visitor id
    ///
    /// Returns `false`, changing nothing, if an id was already delivered.
    /// An empty id initializes the agent without a visitor.
    pub fn resolve(&self, id: impl Into<String>) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            tracing::debug!("visitor id already resolved; ignoring");
            return false;
        };
        if sender.send(id.into()).is_err() {
            tracing::debug!("agent loader has gone away; visitor id dropped");
        }
        true
    }
}

/// Sandbox the agent and start loading it
///
/// Must be called within a tokio runtime. `overrides` must carry the
/// `apiKey` the release is fetched for.
///
/// # Errors
/// [`SandboxError::MissingApiKey`] if `overrides` has no `apiKey`
pub fn arm_agent(
    overrides: AgentConfig,
    hooks: InitializeHooks,
    host: SandboxHost,
) -> SandboxResult<(ArmedAgent, VisitorIdResolver)> {
    let api_key = overrides
        .api_key()
        .filter(|k| !k.is_empty())
        .ok_or(SandboxError::MissingApiKey)?
        .to_string();

    let env = SandboxEnv::new(&host.settings, Arc::clone(&host.fetcher), Arc::clone(&host.clock));
    env.set_config(overrides.clone());

    let slots = Arc::new(DiagnosticSlots::new());
    slots.bind_agent(env.agent())?;
    slots.bind_env(&env)?;

    let (visitor_tx, visitor_rx) = oneshot::channel::<String>();
    let (state_tx, state_rx) = watch::channel(LoadState::Pending);

    let document = SandboxDocument::new(Arc::clone(&env), Arc::clone(&host.document));
    let globals = SandboxGlobals::new(Arc::clone(&env), Arc::clone(&host.window));

    let task_env = Arc::clone(&env);
    let task_slots = Arc::clone(&slots);
    let hooks = Arc::new(hooks);
    tokio::spawn(async move {
        let load = load_agent(&task_env, &api_key, &overrides, &host, &task_slots);
        let (loaded, visitor) = tokio::join!(load, visitor_rx);

        let state = match (loaded, visitor) {
            (Err(e), _) => {
                tracing::error!("error loading agent: {}", e);
                LoadState::Failed(e.to_string())
            }
            (Ok(()), Err(_)) => {
                tracing::warn!("visitor id resolver dropped; agent will not be initialized");
                LoadState::Abandoned
            }
            (Ok(()), Ok(visitor_id)) => {
                let params = initialize_params(&visitor_id, &task_env.config());
                let agent = task_env.agent();
                agent.initialize(params, Some(Arc::clone(&hooks)));
                host.loader.start(agent.take_over(AGENT_FIELDS));
                hooks.emit(LifecycleEvent::Ready);
                LoadState::Initialized
            }
        };
        // nobody may be waiting
        let _ = state_tx.send(state);
    });

    let armed = ArmedAgent {
        document,
        globals,
        env,
        slots,
        state: state_rx,
    };
    Ok((
        armed,
        VisitorIdResolver {
            sender: Mutex::new(Some(visitor_tx)),
        },
    ))
}

async fn load_agent(
    env: &Arc<SandboxEnv>,
    api_key: &str,
    overrides: &AgentConfig,
    host: &SandboxHost,
    slots: &DiagnosticSlots,
) -> SandboxResult<()> {
    let url = Url::parse(&host.settings.agent_url(api_key))?;
    let response = env.fetcher().fetch(FetchRequest::get(url)).await?;
    if !(200..300).contains(&response.status) {
        return Err(SandboxError::Load(format!(
            "agent fetch returned status {}",
            response.status
        )));
    }
    let source = response.body.unwrap_or_default();

    let parsed = parse_agent(&source, overrides, &*host.tables)?;
    let (config, make_helpers, script) = parsed.into_parts();
    env.set_config(config);

    let helpers = Arc::new(make_helpers(Arc::clone(env)));
    slots.bind_helpers(&helpers)?;

    let integrity = *script.integrity();
    tracing::info!("loading parsed agent with integrity value of {}", integrity);
    host.loader
        .load(LoadRequest {
            source: script.into_content(),
            integrity,
            cross_origin: "anonymous",
            async_load: true,
        })
        .map_err(SandboxError::Load)
}

/// `{ visitor: { id } }` (when the id is non-empty) plus the merged options
fn initialize_params(visitor_id: &str, config: &AgentConfig) -> Value {
    let mut params = Map::new();
    if !visitor_id.is_empty() {
        params.insert("visitor".to_string(), serde_json::json!({ "id": visitor_id }));
    }
    if let Value::Object(options) = config.to_json() {
        params.extend(options);
    }
    Value::Object(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_artifact::{RegexLiteral, StructuredValue};
    use serde_json::json;

    #[test]
    fn params_with_visitor() {
        let config = AgentConfig::new().with("apiKey", "k");
        assert_eq!(
            initialize_params("v-1", &config),
            json!({ "visitor": { "id": "v-1" }, "apiKey": "k" })
        );
    }

    #[test]
    fn empty_visitor_is_left_out() {
        let config = AgentConfig::new().with("apiKey", "k");
        assert_eq!(initialize_params("", &config), json!({ "apiKey": "k" }));
    }

    #[test]
    fn params_carry_regex_options() {
        let config = AgentConfig::new().with(
            "htmlAttributes",
            StructuredValue::Regex(RegexLiteral::new("^(tabindex)$", "")),
        );
        let params = initialize_params("v", &config);
        assert_eq!(params["htmlAttributes"], json!("/^(tabindex)$/"));
    }
}
