//! Transport shim
//!
//! Every request the agent makes funnels through [`filtered_fetch`]: the
//! payload is decoded, checked against the allow-list before anything is
//! sent, and the response is shaped before the agent sees it. On top of it
//! sit the three request styles the agent uses: its `ajax` helper, an
//! XHR-style request object and a beacon image.

use crate::env::SandboxEnv;
use crate::error::{SandboxError, SandboxResult};
use crate::hooks::LifecycleEvent;
use crate::ports::{Credentials, FetchRequest, FetchResponse, RequestMode};
use cage_filter::{decode_payload, error_report, filter_response, RawResponse, RequestBody};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Ready state of a completed request
pub const DONE: u8 = 4;

/// Integrity value named by a url's `sha256` parameter
fn integrity_param(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == "sha256")
        .map(|(_, v)| format!("sha256-{v}"))
}

/// Url as the agent's sanitizer would record it
fn sanitized(env: &SandboxEnv, url: &Url) -> String {
    env.agent()
        .hooks()
        .map_or_else(|| url.to_string(), |hooks| hooks.sanitize(url.as_str()))
}

fn emit(env: &SandboxEnv, event: LifecycleEvent) {
    if let Some(hooks) = env.agent().hooks() {
        hooks.emit(event);
    }
}

/// Whether a response body is an object with a `guides` key
fn carries_guides(body: Option<&str>) -> bool {
    body.and_then(|b| serde_json::from_str::<Value>(b).ok())
        .is_some_and(|v| v.get("guides").is_some())
}

/// Send a request on the agent's behalf
///
/// Payload decoding failures abort regardless of mode. Allow-list and
/// response-shape failures abort when sealed; unsealed, the request goes out
/// and the raw response is returned.
///
/// # Errors
/// Filter denials, response rejections and host fetch failures
pub async fn filtered_fetch(env: &SandboxEnv, request: FetchRequest) -> SandboxResult<FetchResponse> {
    let payload = decode_payload(&request.url, request.body.as_ref(), |token| {
        env.compressed(token)
    })?;

    if let Some(report) = error_report(payload.as_ref()) {
        tracing::error!("suppressed error report from agent: {}", report);
        return Ok(FetchResponse {
            status: 200,
            ..FetchResponse::default()
        });
    }

    let allowed = env.check_transmission(
        &request.url,
        payload.as_ref(),
        request.integrity.as_deref(),
    );
    env.enforce(allowed, "fetch")?;

    let url = request.url.clone();
    let response = env.fetcher().fetch(request).await.map_err(|e| {
        tracing::error!("fetch of {} failed: {}", sanitized(env, &url), e);
        SandboxError::Fetch(e)
    })?;

    let raw = RawResponse {
        status: response.status,
        content_type: response.content_type.as_deref(),
        body: response.body.as_deref(),
    };
    let agent = env.agent();
    match filter_response(&raw, |key| agent.has_field(key)) {
        Ok(filtered) => {
            if carries_guides(filtered.body()) {
                emit(env, LifecycleEvent::GuidesLoaded);
            } else if filtered.status() == 200 && url.path().ends_with(".dom.json") {
                emit(env, LifecycleEvent::DeliverablesLoaded);
            }
            Ok(FetchResponse {
                status: filtered.status(),
                content_type: response.content_type.clone(),
                body: filtered.body().map(str::to_string),
            })
        }
        Err(e) if env.is_sealed() => {
            if carries_guides(raw.body) {
                emit(env, LifecycleEvent::GuidesFailed);
            }
            tracing::error!("rejected response from {}", sanitized(env, &url));
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(
                "fetch response failed filtering, but proceeding because environment is unsealed: {}",
                e
            );
            Ok(response)
        }
    }
}

/// Parameters of the agent's `ajax` helper
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AjaxRequest {
    pub url: String,
    pub method: Option<String>,
    pub data: Option<String>,
    pub headers: Vec<(String, String)>,
    pub with_credentials: bool,
}

impl AjaxRequest {
    /// GET request for `url`
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the post body
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.method = Some("POST".to_string());
        self.data = Some(data.into());
        self
    }
}

/// What the agent's `ajax` helper resolves to
#[derive(Debug, Clone, PartialEq)]
pub struct AjaxResponse {
    /// HTTP status; 0 for any failure
    pub status: u16,
    /// Body, parsed as JSON when possible
    pub data: Option<Value>,
}

impl AjaxResponse {
    fn error() -> Self {
        Self {
            status: 0,
            data: None,
        }
    }
}

/// The agent's `ajax` helper over [`filtered_fetch`]
///
/// Never fails: every error is logged and reported as status 0.
pub async fn filtered_ajax(env: &SandboxEnv, params: AjaxRequest) -> AjaxResponse {
    match try_ajax(env, params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("fetch error: {}", e);
            AjaxResponse::error()
        }
    }
}

async fn try_ajax(env: &SandboxEnv, params: AjaxRequest) -> SandboxResult<AjaxResponse> {
    let url = Url::parse(&params.url)?;
    let integrity = integrity_param(&url);
    let request = FetchRequest {
        method: params
            .method
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "GET".to_string()),
        headers: params.headers,
        body: params.data.filter(|d| !d.is_empty()).map(RequestBody::Text),
        credentials: if params.with_credentials {
            Credentials::SameOrigin
        } else {
            Credentials::Omit
        },
        integrity,
        ..FetchRequest::get(url)
    };
    let response = filtered_fetch(env, request).await?;
    let data = response.body.map(|text| {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    });
    Ok(AjaxResponse {
        status: response.status,
        data,
    })
}

type ReadyStateCallback = Box<dyn FnMut() + Send>;

/// XHR-style request object handed to the agent
///
/// `with_credentials` selects `include`; otherwise same-origin.
pub struct MediatedRequest {
    env: Arc<SandboxEnv>,
    method: String,
    url: Option<Url>,
    headers: Vec<(String, String)>,
    with_credentials: bool,
    status: u16,
    ready_state: u8,
    response_text: String,
    on_ready_state_change: Option<ReadyStateCallback>,
}

impl fmt::Debug for MediatedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediatedRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("status", &self.status)
            .field("ready_state", &self.ready_state)
            .finish_non_exhaustive()
    }
}

impl MediatedRequest {
    /// Unopened request
    #[must_use]
    pub fn new(env: Arc<SandboxEnv>) -> Self {
        Self {
            env,
            method: String::new(),
            url: None,
            headers: Vec::new(),
            with_credentials: false,
            status: 0,
            ready_state: 0,
            response_text: String::new(),
            on_ready_state_change: None,
        }
    }

    /// `open(method, url)`
    ///
    /// # Errors
    /// [`SandboxError::InvalidUrl`] if the url does not parse
    pub fn open(&mut self, method: &str, url: &str) -> SandboxResult<()> {
        self.url = Some(Url::parse(url)?);
        self.method = method.to_string();
        Ok(())
    }

    /// `setRequestHeader(name, value)`
    pub fn set_request_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// `withCredentials = value`
    pub fn set_with_credentials(&mut self, value: bool) {
        self.with_credentials = value;
    }

    /// `onreadystatechange = f`
    pub fn on_ready_state_change(&mut self, f: impl FnMut() + Send + 'static) {
        self.on_ready_state_change = Some(Box::new(f));
    }

    /// `send(data)`, completing when the response or failure is in
    ///
    /// Failures are never raised to the caller: status becomes 0 and the
    /// response text carries the error.
    pub async fn send(&mut self, data: Option<RequestBody>) {
        let env = Arc::clone(&self.env);
        let result = match self.build_request(data) {
            Ok(request) => filtered_fetch(&env, request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(response) => {
                self.status = response.status;
                self.response_text = response.body.unwrap_or_default();
            }
            Err(e) => {
                tracing::warn!("request failed: {}", e);
                self.status = 0;
                self.response_text = e.to_string();
            }
        }
        self.ready_state = DONE;
        if let Some(callback) = self.on_ready_state_change.as_mut() {
            callback();
        }
    }

    fn build_request(&self, data: Option<RequestBody>) -> SandboxResult<FetchRequest> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| SandboxError::capability("send() before open()"))?;
        Ok(FetchRequest {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: data,
            credentials: if self.with_credentials {
                Credentials::Include
            } else {
                Credentials::SameOrigin
            },
            integrity: integrity_param(&url),
            ..FetchRequest::get(url)
        })
    }

    /// `status`
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// `readyState`
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> u8 {
        self.ready_state
    }

    /// `responseText`
    #[inline]
    #[must_use]
    pub fn response_text(&self) -> &str {
        &self.response_text
    }
}

/// Which beacon callback fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconOutcome {
    /// `onload`
    Load,
    /// `onerror`
    Error,
}

/// Image-style fire-and-forget request
#[derive(Debug, Clone)]
pub struct Beacon {
    env: Arc<SandboxEnv>,
}

impl Beacon {
    /// New beacon
    #[must_use]
    pub fn new(env: Arc<SandboxEnv>) -> Self {
        Self { env }
    }

    /// Assign `src`, sending an opaque credential-less request
    pub async fn set_src(&self, src: &str) -> BeaconOutcome {
        let request = match Url::parse(src) {
            Ok(url) => FetchRequest {
                mode: RequestMode::NoCors,
                ..FetchRequest::get(url)
            },
            Err(e) => {
                tracing::warn!("beacon with unparsable src {}: {}", src, e);
                return BeaconOutcome::Error;
            }
        };
        match filtered_fetch(&self.env, request).await {
            Ok(_) => BeaconOutcome::Load,
            Err(e) => {
                tracing::debug!("beacon failed: {}", e);
                BeaconOutcome::Error
            }
        }
    }
}
