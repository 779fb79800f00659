//! Testing utilities for the agent-cage workspace
//!
//! Synthetic agent sources, fixup tables built for them, and scripted host
//! doubles.

#![allow(missing_docs)]

use cage_artifact::{FixupEntry, FixupSet, Integrity};
use cage_env::{
    make_fixup_helpers, AgentCall, FetchError, FetchRequest, FetchResponse, Fetcher, HelperFactory,
    HostDocument, HostElement, HostProperty, HostWindow, LoadRequest, SandboxEnv,
    SandboxSettings, ScriptLoader,
};
use cage_filter::Enforcement;
use cage_parser::{AgentConfig, FixupTables};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use cage_filter::FixedClock;

pub const API_KEY: &str = "67c2f326-a6c2-4aa2-4559-08a53b679e93";
pub const DATA_HOST: &str = "data.pendo.io";
pub const GUIDE_ORIGIN: &str = "https://pendo-static-6047664892149760.storage.googleapis.com";
pub const AGENT_VERSION: &str = "2.117.0_prod";
pub const NOW: i64 = 1_634_584_444_000;

/// Builds agent sources in the wrapper format
#[derive(Debug, Clone)]
pub struct AgentSourceBuilder {
    environment: String,
    version: String,
    installed: String,
    body: String,
    tail: Vec<String>,
}

impl AgentSourceBuilder {
    pub fn new(body: &str) -> Self {
        Self {
            environment: "production".to_string(),
            version: "2.117.0".to_string(),
            installed: "2021-10-18T19:14:04Z".to_string(),
            body: body.to_string(),
            tail: Vec::new(),
        }
    }

    #[must_use]
    pub fn environment(mut self, environment: &str) -> Self {
        self.environment = environment.to_string();
        self
    }

    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    #[must_use]
    pub fn installed(mut self, installed: &str) -> Self {
        self.installed = installed.to_string();
        self
    }

    /// Add a tail entry; `value` is written as is
    #[must_use]
    pub fn option(mut self, name: &str, value: &str) -> Self {
        self.tail.push(format!("    {name}: {value},"));
        self
    }

    /// Add a raw tail line
    #[must_use]
    pub fn tail_line(mut self, line: &str) -> Self {
        self.tail.push(line.to_string());
        self
    }

    pub fn header(&self) -> String {
        format!(
            "// Pendo Agent Wrapper\n\
             // Environment:    {}\n\
             // Agent Version:  {}\n\
             // Installed:      {}\n\
             (function (PendoConfig) {{",
            self.environment, self.version, self.installed
        )
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn build(&self) -> String {
        let mut out = format!("{}\n{}\n}})({{\n", self.header(), self.body);
        for line in &self.tail {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("});");
        out
    }
}

/// A source whose tail carries the options the filters need
pub fn standard_source(body: &str) -> String {
    AgentSourceBuilder::new(body)
        .option("apiKey", &format!("\"{API_KEY}\""))
        .option("dataHost", &format!("\"{DATA_HOST}\""))
        .option("allowedOriginServers", &format!("[\"{GUIDE_ORIGIN}\"]"))
        .option("htmlAttributes", "/^(tabindex)$/")
        .build()
}

/// Overrides matching [`standard_source`]
pub fn standard_overrides() -> AgentConfig {
    AgentConfig::new()
        .with("apiKey", API_KEY)
        .with("dataHost", DATA_HOST)
}

/// Tables accepting exactly `body`, with the real helper factory
pub fn tables_for(body: &str, fixups: FixupSet) -> FixupTables<HelperFactory> {
    FixupTables::new().with(
        Integrity::compute(body.as_bytes()),
        FixupEntry::new(fixups, make_fixup_helpers as HelperFactory),
    )
}

/// Environment on a fixed clock at [`NOW`]
pub fn sandbox_env(enforcement: Enforcement, fetcher: Arc<dyn Fetcher>) -> (Arc<SandboxEnv>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(NOW));
    let settings = SandboxSettings {
        enforcement,
        ..SandboxSettings::default()
    };
    let env = SandboxEnv::new(&settings, fetcher, clock.clone());
    (env, clock)
}

/// Environment configured like a loaded agent: config, api key and version set
pub fn loaded_env(enforcement: Enforcement, fetcher: Arc<dyn Fetcher>) -> (Arc<SandboxEnv>, Arc<FixedClock>) {
    let (env, clock) = sandbox_env(enforcement, fetcher);
    env.set_config(
        standard_overrides().with(
            "allowedOriginServers",
            cage_artifact::StructuredValue::Array(vec![GUIDE_ORIGIN.into()]),
        ),
    );
    env.set_api_key(API_KEY).unwrap();
    env.set_version(AGENT_VERSION).unwrap();
    (env, clock)
}

/// Telemetry url the filter accepts at [`NOW`]
pub fn telemetry_url(endpoint: &str, extra_query: &str) -> String {
    format!("https://{DATA_HOST}/data/{endpoint}/{API_KEY}?v={AGENT_VERSION}&ct={NOW}{extra_query}")
}

/// Fetcher answering from a fixed route table and recording every request
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: Mutex<Vec<(String, FetchResponse)>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer requests whose url starts with `prefix`
    pub fn respond(&self, prefix: &str, response: FetchResponse) {
        self.routes.lock().push((prefix.to_string(), response));
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.to_string();
        self.requests.lock().push(request);
        self.routes
            .lock()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| FetchError(format!("no route for {url}")))
    }
}

/// Loader that records what it was asked to load and replay
#[derive(Debug, Default)]
pub struct RecordingLoader {
    loaded: Mutex<Vec<LoadRequest>>,
    started: Mutex<Vec<AgentCall>>,
    refuse: bool,
}

impl RecordingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Self::default()
        })
    }

    pub fn loaded(&self) -> Vec<LoadRequest> {
        self.loaded.lock().clone()
    }

    pub fn started(&self) -> Vec<AgentCall> {
        self.started.lock().clone()
    }
}

impl ScriptLoader for RecordingLoader {
    fn load(&self, request: LoadRequest) -> Result<(), String> {
        if self.refuse {
            return Err("integrity check failed".to_string());
        }
        self.loaded.lock().push(request);
        Ok(())
    }

    fn start(&self, calls: Vec<AgentCall>) {
        self.started.lock().extend(calls);
    }
}

/// Document double
#[derive(Debug)]
pub struct FakeDocument {
    supports_integrity: bool,
    created: Mutex<Vec<String>>,
    properties: Mutex<HashMap<String, Value>>,
}

impl FakeDocument {
    pub fn new() -> Arc<Self> {
        Self::with_integrity(true)
    }

    pub fn with_integrity(supports_integrity: bool) -> Arc<Self> {
        Arc::new(Self {
            supports_integrity,
            created: Mutex::new(Vec::new()),
            properties: Mutex::new(HashMap::new()),
        })
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

impl HostDocument for FakeDocument {
    fn supports_integrity(&self) -> bool {
        self.supports_integrity
    }

    fn create_element(&self, tag: &str) -> HostElement {
        self.created.lock().push(tag.to_string());
        HostElement {
            tag: tag.to_string(),
        }
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.lock().get(name).cloned()
    }

    fn set_property(&self, name: &str, value: Value) {
        self.properties.lock().insert(name.to_string(), value);
    }
}

/// Global object double
#[derive(Debug)]
pub struct FakeWindow {
    user_agent: String,
    properties: HashMap<String, HostProperty>,
}

impl FakeWindow {
    pub fn new() -> Arc<Self> {
        let mut properties = HashMap::new();
        for name in [
            "fetch",
            "XMLHttpRequest",
            "setTimeout",
            "clearTimeout",
            "setInterval",
            "clearInterval",
            "addEventListener",
            "removeEventListener",
            "Image",
        ] {
            properties.insert(name.to_string(), HostProperty::Function);
        }
        properties.insert(
            "location".to_string(),
            HostProperty::Value(serde_json::json!({ "host": "app.example.com" })),
        );
        properties.insert("innerWidth".to_string(), HostProperty::Value(1280.into()));
        Arc::new(Self {
            user_agent: "Mozilla/5.0 (test)".to_string(),
            properties,
        })
    }
}

impl HostWindow for FakeWindow {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn property(&self, name: &str) -> HostProperty {
        self.properties
            .get(name)
            .cloned()
            .unwrap_or(HostProperty::Missing)
    }
}
