//! Transport Shim Tests
//!
//! Requests the agent makes through the mediated fetch path, its ajax helper,
//! the XHR-style request object and the beacon.

use cage_env::{
    filtered_ajax, filtered_fetch, AjaxRequest, Beacon, BeaconOutcome, Credentials, FetchRequest,
    FetchResponse, InitializeHooks, LifecycleEvent, MediatedRequest, RequestMode, SandboxError, AGENT_FIELDS,
    DONE,
};
use cage_filter::{Enforcement, FilterError, RequestBody};
use cage_test_utils::{loaded_env, telemetry_url, ScriptedFetcher, API_KEY, GUIDE_ORIGIN};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

fn gif() -> FetchResponse {
    FetchResponse {
        status: 200,
        content_type: Some("image/gif".to_string()),
        body: None,
    }
}

fn post(url: &str, body: &str) -> FetchRequest {
    FetchRequest {
        method: "POST".to_string(),
        body: Some(RequestBody::from(body)),
        ..FetchRequest::get(Url::parse(url).unwrap())
    }
}

fn guide_url() -> String {
    format!("{GUIDE_ORIGIN}/guide-content/abc/def.dom.json?sha256=AAAA")
}

#[tokio::test]
async fn test_allowed_telemetry_is_sent_and_recorded() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", gif());
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let body = json!([{ "type": "load", "url": "https://app/" }, { "type": "click" }]).to_string();
    let response = filtered_fetch(&env, post(&telemetry_url("ptm.gif", ""), &body))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, None);
    assert_eq!(fetcher.requests().len(), 1);

    let sent = env.transmissions();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].endpoint(), "ptm.gif");
    assert_eq!(sent[0].get("type"), Some(&json!("load")));
    assert_eq!(sent[1].get("type"), Some(&json!("click")));
}

#[tokio::test]
async fn test_compressed_payload_resolves_within_the_turn() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", gif());
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let token = env.compress(&json!({ "type": "identify" }), |_| "eJyrVg".to_string());
    let url = telemetry_url("ptm.gif", &format!("&jzb={token}"));
    let request = FetchRequest::get(Url::parse(&url).unwrap());

    filtered_fetch(&env, request.clone()).await.unwrap();
    assert_eq!(env.transmissions()[0].get("type"), Some(&json!("identify")));

    env.advance_turn();
    let err = filtered_fetch(&env, request).await.unwrap_err();
    assert!(matches!(err, SandboxError::Filter(FilterError::TransmissionDenied(_))));
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_jzb_with_body_is_denied_even_unsealed() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", gif());
    let (env, _) = loaded_env(Enforcement::Unsealed, fetcher.clone());
    env.compress(&json!({}), |_| "tok".to_string());

    let url = telemetry_url("ptm.gif", "&jzb=tok");
    let err = filtered_fetch(&env, post(&url, "{}")).await.unwrap_err();
    assert!(matches!(err, SandboxError::Filter(FilterError::TransmissionDenied(_))));
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn test_error_reports_are_answered_locally() {
    let fetcher = ScriptedFetcher::new();
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let body = json!({ "error": "TypeError: x is undefined" }).to_string();
    let response = filtered_fetch(&env, post("https://app.pendo.io/errors", &body))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, None);
    assert!(fetcher.requests().is_empty());
    assert!(env.transmissions().is_empty());
}

#[tokio::test]
async fn test_denied_request_never_reaches_the_network() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://", FetchResponse::ok("application/json", "{}"));
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let url = format!("https://data.pendo.io/data/ptm.gif/{API_KEY}?v=2.117.0_prod&leak=secret");
    let err = filtered_fetch(&env, FetchRequest::get(Url::parse(&url).unwrap()))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "transmission denied: attempted fetch with unexpected url parameter 'leak' = 'secret'"
    );
    assert!(fetcher.requests().is_empty());
    assert!(env.transmissions().is_empty());
}

#[tokio::test]
async fn test_unsealed_denial_still_sends() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://elsewhere.example.com/", FetchResponse::ok("application/json", "{}"));
    let (env, _) = loaded_env(Enforcement::Unsealed, fetcher.clone());

    let request = FetchRequest::get(Url::parse("https://elsewhere.example.com/x").unwrap());
    let response = filtered_fetch(&env, request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_guide_response_forces_code_injection_prevention() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(
        GUIDE_ORIGIN,
        FetchResponse::ok(
            "application/json",
            json!({ "guides": [], "preventCodeInjection": false }).to_string(),
        ),
    );
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let response = filtered_ajax(&env, AjaxRequest::get(guide_url())).await;

    assert_eq!(response.status, 200);
    let data = response.data.unwrap();
    assert_eq!(data["preventCodeInjection"], Value::Bool(true));

    let sent = fetcher.requests();
    assert_eq!(sent[0].integrity.as_deref(), Some("sha256-AAAA"));
    assert_eq!(sent[0].credentials, Credentials::Omit);
    assert_eq!(sent[0].method, "GET");
}

#[tokio::test]
async fn test_response_clobbering_a_live_field_is_rejected() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(
        GUIDE_ORIGIN,
        FetchResponse::ok("application/json", json!({ "ajax": "pwned" }).to_string()),
    );
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());
    env.agent().take_over(AGENT_FIELDS);

    let request = FetchRequest {
        integrity: Some("sha256-AAAA".to_string()),
        ..FetchRequest::get(Url::parse(&guide_url()).unwrap())
    };
    let err = filtered_fetch(&env, request.clone()).await.unwrap_err();
    assert!(matches!(err, SandboxError::Filter(FilterError::ResponseShape(_))));

    let (unsealed, _) = loaded_env(Enforcement::Unsealed, fetcher.clone());
    unsealed.agent().take_over(AGENT_FIELDS);
    let raw = filtered_fetch(&unsealed, request).await.unwrap();
    assert_eq!(raw.body.as_deref(), Some(r#"{"ajax":"pwned"}"#));
}

fn recording_hooks(events: &Arc<Mutex<Vec<LifecycleEvent>>>) -> InitializeHooks {
    [
        LifecycleEvent::GuidesLoaded,
        LifecycleEvent::GuidesFailed,
        LifecycleEvent::DeliverablesLoaded,
    ]
    .into_iter()
    .fold(InitializeHooks::default(), |hooks, event| {
        let events = Arc::clone(events);
        hooks.on(event, move || events.lock().push(event))
    })
}

#[tokio::test]
async fn test_guide_responses_fire_lifecycle_events() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let fetcher = ScriptedFetcher::new();
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());
    env.agent().initialize(json!({}), Some(Arc::new(recording_hooks(&events))));
    env.agent().take_over(AGENT_FIELDS);
    let request = FetchRequest {
        integrity: Some("sha256-AAAA".to_string()),
        ..FetchRequest::get(Url::parse(&guide_url()).unwrap())
    };

    fetcher.respond(
        GUIDE_ORIGIN,
        FetchResponse::ok("application/json", json!({ "guides": [] }).to_string()),
    );
    filtered_fetch(&env, request.clone()).await.unwrap();

    let fetcher2 = ScriptedFetcher::new();
    fetcher2.respond(
        GUIDE_ORIGIN,
        FetchResponse::ok("application/json", json!({ "id": "step" }).to_string()),
    );
    let (content_env, _) = loaded_env(Enforcement::Sealed, fetcher2);
    content_env.agent().initialize(json!({}), Some(Arc::new(recording_hooks(&events))));
    filtered_fetch(&content_env, request.clone()).await.unwrap();

    let fetcher3 = ScriptedFetcher::new();
    fetcher3.respond(
        GUIDE_ORIGIN,
        FetchResponse::ok("application/json", json!({ "guides": [], "ajax": 1 }).to_string()),
    );
    let (failing_env, _) = loaded_env(Enforcement::Sealed, fetcher3);
    failing_env.agent().initialize(json!({}), Some(Arc::new(recording_hooks(&events))));
    failing_env.agent().take_over(AGENT_FIELDS);
    assert!(filtered_fetch(&failing_env, request).await.is_err());

    assert_eq!(
        *events.lock(),
        vec![
            LifecycleEvent::GuidesLoaded,
            LifecycleEvent::DeliverablesLoaded,
            LifecycleEvent::GuidesFailed,
        ]
    );
}

#[tokio::test]
async fn test_ajax_failures_report_status_zero() {
    let fetcher = ScriptedFetcher::new();
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    assert_eq!(filtered_ajax(&env, AjaxRequest::get("not a url")).await.status, 0);

    // allowed, but the network fails
    let response = filtered_ajax(&env, AjaxRequest::get(guide_url())).await;
    assert_eq!(response.status, 0);
    assert_eq!(fetcher.requests().len(), 1);
}

#[tokio::test]
async fn test_ajax_passes_post_data_and_credentials() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", FetchResponse::ok("text/plain", "ok"));
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let params = AjaxRequest {
        with_credentials: true,
        ..AjaxRequest::get(telemetry_url("guide.json", "")).with_data(r#"{"type":"guide"}"#)
    };
    let response = filtered_ajax(&env, params).await;

    assert_eq!(response.status, 0, "non-json body is a response shape error");
    let sent = fetcher.requests();
    assert_eq!(sent[0].method, "POST");
    assert_eq!(sent[0].credentials, Credentials::SameOrigin);
    assert_eq!(sent[0].body, Some(RequestBody::from(r#"{"type":"guide"}"#)));
}

#[tokio::test]
async fn test_mediated_request_completes_and_notifies() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", gif());
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let notified = Arc::new(AtomicBool::new(false));
    let flag = notified.clone();
    let mut xhr = MediatedRequest::new(env.clone());
    xhr.open("POST", &telemetry_url("ptm.gif", "")).unwrap();
    xhr.set_request_header("Content-Type", "application/json");
    xhr.set_with_credentials(true);
    xhr.on_ready_state_change(move || flag.store(true, Ordering::SeqCst));
    assert_eq!(xhr.ready_state(), 0);

    xhr.send(Some(RequestBody::from(r#"[{"type":"load"}]"#))).await;

    assert_eq!(xhr.status(), 200);
    assert_eq!(xhr.ready_state(), DONE);
    assert_eq!(xhr.response_text(), "");
    assert!(notified.load(Ordering::SeqCst));

    let sent = fetcher.requests();
    assert_eq!(sent[0].credentials, Credentials::Include);
    assert_eq!(
        sent[0].headers,
        vec![("Content-Type".to_string(), "application/json".to_string())]
    );
    assert_eq!(env.transmissions().len(), 1);
}

#[tokio::test]
async fn test_mediated_request_failure_is_status_zero() {
    let fetcher = ScriptedFetcher::new();
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let mut xhr = MediatedRequest::new(env);
    xhr.open("GET", "https://evil.example.com/steal").unwrap();
    xhr.send(None).await;

    assert_eq!(xhr.status(), 0);
    assert_eq!(xhr.ready_state(), DONE);
    assert!(xhr.response_text().starts_with("transmission denied"));
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn test_mediated_request_defaults_to_same_origin() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", gif());
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());

    let mut xhr = MediatedRequest::new(env);
    xhr.open("GET", &telemetry_url("ptm.gif", "")).unwrap();
    xhr.send(None).await;
    assert_eq!(fetcher.requests()[0].credentials, Credentials::SameOrigin);
}

#[test]
fn test_mediated_request_rejects_bad_url() {
    let (env, _) = loaded_env(Enforcement::Sealed, ScriptedFetcher::new());
    let mut xhr = MediatedRequest::new(env);
    assert!(matches!(xhr.open("GET", "::"), Err(SandboxError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_beacon_outcomes() {
    let fetcher = ScriptedFetcher::new();
    fetcher.respond("https://data.pendo.io/", gif());
    let (env, _) = loaded_env(Enforcement::Sealed, fetcher.clone());
    let beacon = Beacon::new(env);

    assert_eq!(beacon.set_src(&telemetry_url("ptm.gif", "")).await, BeaconOutcome::Load);
    assert_eq!(beacon.set_src("https://evil.example.com/p.gif").await, BeaconOutcome::Error);
    assert_eq!(beacon.set_src("garbage").await, BeaconOutcome::Error);

    let sent = fetcher.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mode, RequestMode::NoCors);
    assert_eq!(sent[0].credentials, Credentials::Omit);
}
