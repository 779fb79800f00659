//! Host ports
//!
//! The sandbox never touches the real network, document or global object
//! directly. Each is reached through one of these traits, so the host can be
//! a browser bridge, a headless harness or a test double.

use crate::agent::AgentCall;
use crate::error::FetchError;
use cage_artifact::Integrity;
use cage_filter::RequestBody;
use serde_json::Value;
use url::Url;

/// Credential mode of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Credentials {
    /// Never attach credentials
    #[default]
    Omit,
    /// Attach credentials for same-origin requests
    SameOrigin,
    /// Always attach credentials
    Include,
}

/// Request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    #[default]
    Cors,
    /// Opaque, fire-and-forget request
    NoCors,
}

/// A network request as issued to the host
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: Url,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub credentials: Credentials,
    pub integrity: Option<String>,
    pub mode: RequestMode,
}

impl FetchRequest {
    /// A credential-less GET
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            credentials: Credentials::Omit,
            integrity: None,
            mode: RequestMode::Cors,
        }
    }
}

/// A network response as returned by the host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

impl FetchResponse {
    /// 200 response with a body
    #[must_use]
    pub fn ok(content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body: Some(body.into()),
        }
    }
}

/// Host network access
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue a request
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Script inclusion request for the rewritten agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source: String,
    pub integrity: Integrity,
    pub cross_origin: &'static str,
    pub async_load: bool,
}

/// Host script inclusion with subresource-integrity checking
pub trait ScriptLoader: Send + Sync {
    /// Include a script
    ///
    /// # Errors
    /// A message describing why the host refused the script
    fn load(&self, request: LoadRequest) -> Result<(), String>;

    /// Replay the calls queued on the stub, `initialize` first, into the
    /// loaded agent
    fn start(&self, calls: Vec<AgentCall>);
}

/// An element created by the host document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostElement {
    pub tag: String,
}

/// The real document
pub trait HostDocument: Send + Sync {
    /// Whether script elements support the `integrity` attribute
    fn supports_integrity(&self) -> bool;

    /// Create an element
    fn create_element(&self, tag: &str) -> HostElement;

    /// Read a property
    fn property(&self, name: &str) -> Option<Value>;

    /// Write a property
    fn set_property(&self, name: &str, value: Value);
}

/// A property of the real global object
#[derive(Debug, Clone, PartialEq)]
pub enum HostProperty {
    /// Plain value
    Value(Value),
    /// Function
    Function,
    /// Not defined
    Missing,
}

/// The real global object
pub trait HostWindow: Send + Sync {
    /// Navigator user agent string
    fn user_agent(&self) -> String;

    /// Any other property
    fn property(&self, name: &str) -> HostProperty;
}
