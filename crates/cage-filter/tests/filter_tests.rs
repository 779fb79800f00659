//! Filter Pipeline Tests
//!
//! Requests run through payload decoding and the allow-list the way the
//! transport shim chains them, plus response and guide filtering.

use cage_artifact::StructuredValue;
use cage_filter::{
    decode_payload, error_report, filter_response, filter_guide_tag, is_transmission_allowed,
    Enforcement, FilterContext, FilterError, RawResponse, RequestBody, TransmissionLog,
};
use cage_parser::AgentConfig;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use url::Url;

const NOW: i64 = 1_634_584_444_000;
const KEY: &str = "67c2f326-a6c2-4aa2-4559-08a53b679e93";
const GUIDES: &str = "https://pendo-static-6047664892149760.storage.googleapis.com";

fn context() -> FilterContext {
    let config = AgentConfig::new().with("dataHost", "data.pendo.io").with(
        "allowedOriginServers",
        StructuredValue::Array(vec![GUIDES.into()]),
    );
    FilterContext::from_config(&config)
        .with_api_key(Some(KEY))
        .with_version(Some("2.117.0_prod"))
        .at(NOW)
}

fn telemetry(endpoint: &str, query: &str) -> Url {
    Url::parse(&format!(
        "https://data.pendo.io/data/{endpoint}/{KEY}?v=2.117.0_prod&ct={NOW}{query}"
    ))
    .unwrap()
}

/// Decode then check, as a mediated fetch does
fn send(
    url: &Url,
    body: Option<&str>,
    compressed: &HashMap<String, Value>,
    log: &mut TransmissionLog,
) -> Result<(), FilterError> {
    let body = body.map(RequestBody::from);
    let payload = decode_payload(url, body.as_ref(), |token| compressed.get(token).cloned())?;
    is_transmission_allowed(url, payload.as_ref(), None, &context(), log)
}

#[test]
fn test_post_body_is_logged_per_element() {
    let mut log = TransmissionLog::new();
    let body = json!([{ "type": "load" }, 7, null]).to_string();
    send(&telemetry("ptm.gif", ""), Some(&body), &HashMap::new(), &mut log).unwrap();

    let records = log.snapshot();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].as_map(), json!({ "type": "load", "endpoint": "ptm.gif" }).as_object().unwrap());
    assert_eq!(records[1].get("value"), Some(&json!(7)));
    assert_eq!(records[2].as_map().len(), 1);
}

#[test]
fn test_endpoint_cannot_be_spoofed_by_payload() {
    let mut log = TransmissionLog::new();
    let body = json!({ "endpoint": "innocent", "type": "track" }).to_string();
    send(&telemetry("ptm.gif", ""), Some(&body), &HashMap::new(), &mut log).unwrap();
    assert_eq!(log.snapshot()[0].endpoint(), "ptm.gif");
}

#[test]
fn test_jzb_resolves_through_the_compression_map() {
    let mut log = TransmissionLog::new();
    let mut compressed = HashMap::new();
    compressed.insert("eJyrVg".to_string(), json!({ "type": "identify" }));

    send(&telemetry("ptm.gif", "&jzb=eJyrVg"), None, &compressed, &mut log).unwrap();
    assert_eq!(log.snapshot()[0].get("type"), Some(&json!("identify")));

    let err = send(&telemetry("ptm.gif", "&jzb=unknown"), None, &compressed, &mut log).unwrap_err();
    assert_eq!(
        err,
        FilterError::TransmissionDenied(
            "agent tried to send jzb data missing from the compression map".to_string()
        )
    );
    assert_eq!(log.len(), 1);
}

#[test]
fn test_jzb_and_body_together_are_denied() {
    let mut log = TransmissionLog::new();
    let mut compressed = HashMap::new();
    compressed.insert("t".to_string(), json!({}));
    let err = send(&telemetry("ptm.gif", "&jzb=t"), Some("{}"), &compressed, &mut log).unwrap_err();
    assert!(matches!(err, FilterError::TransmissionDenied(_)));
    assert!(log.is_empty());
}

#[test]
fn test_empty_body_counts_as_none() {
    let mut log = TransmissionLog::new();
    send(&telemetry("ptm.gif", ""), Some(""), &HashMap::new(), &mut log).unwrap();
    assert_eq!(log.snapshot()[0].as_map().len(), 1);
}

#[test]
fn test_binary_and_non_json_bodies_are_denied() {
    let url = telemetry("ptm.gif", "");
    let binary = RequestBody::Binary(vec![1, 2, 3]);
    assert!(decode_payload(&url, Some(&binary), |_| None).is_err());
    assert!(decode_payload(&url, Some(&RequestBody::from("{nope")), |_| None).is_err());
}

#[test]
fn test_error_reports_are_recognized() {
    assert!(error_report(Some(&json!({ "error": "boom" }))).is_some());
    assert!(error_report(Some(&json!({ "error": "" }))).is_none());
    assert!(error_report(Some(&json!({ "error": 0 }))).is_none());
    assert!(error_report(Some(&json!([{ "error": "boom" }]))).is_none());
    assert!(error_report(None).is_none());
}

#[test]
fn test_unsealed_mode_only_warns() {
    let err = Err(FilterError::TransmissionDenied("x".to_string()));
    assert_eq!(Enforcement::Unsealed.enforce(err.clone(), "fetch"), Ok(()));
    assert_eq!(Enforcement::Sealed.enforce(err.clone(), "fetch"), err);
    assert_eq!(Enforcement::default(), Enforcement::Sealed);
}

#[test]
fn test_guide_response_is_forced_safe() {
    let body = json!({ "guides": [{ "id": "g" }], "normalizedUrl": "https://app/" }).to_string();
    let raw = RawResponse {
        status: 200,
        content_type: Some("application/json; charset=utf-8"),
        body: Some(&body),
    };
    let filtered = filter_response(&raw, |_| false).unwrap();
    let value: Value = serde_json::from_str(filtered.body().unwrap()).unwrap();
    assert_eq!(value["preventCodeInjection"], json!(true));
    assert_eq!(value["guides"][0]["id"], json!("g"));
}

#[test]
fn test_unknown_keys_pass_unless_they_clobber() {
    let body = json!({ "experimental": 1 }).to_string();
    let raw = RawResponse {
        status: 200,
        content_type: Some("application/json"),
        body: Some(&body),
    };
    assert!(filter_response(&raw, |_| false).is_ok());
    assert!(matches!(
        filter_response(&raw, |k| k == "experimental"),
        Err(FilterError::ResponseShape(_))
    ));
}

#[test]
fn test_guide_markup_filtering() {
    assert!(filter_guide_tag("div", [("class", "x")]).is_ok());
    assert_eq!(
        filter_guide_tag("iframe", Vec::<(&str, &str)>::new()).unwrap_err(),
        FilterError::CapabilityViolation("guides may not contain 'iframe'".to_string())
    );
    assert!(filter_guide_tag("a", [("href", " javascript:alert(1)")]).is_err());
}

proptest! {
    #[test]
    fn test_unexpected_telemetry_params_are_denied(name in "[a-uw-y][a-z]{0,8}", value in "[a-z0-9]{1,8}") {
        prop_assume!(name != "jzb" && name != "ct");
        let mut log = TransmissionLog::new();
        let url = telemetry("ptm.gif", &format!("&{name}={value}"));
        let result = send(&url, None, &HashMap::new(), &mut log);
        prop_assert_eq!(
            result,
            Err(FilterError::TransmissionDenied(format!(
                "attempted fetch with unexpected url parameter '{name}' = '{value}'"
            )))
        );
        prop_assert!(log.is_empty());
    }

    #[test]
    fn test_ct_window_is_inclusive(delta in -500i64..500) {
        let mut log = TransmissionLog::new();
        let url = Url::parse(&format!(
            "https://data.pendo.io/data/ptm.gif/{KEY}?ct={}", NOW + delta
        )).unwrap();
        let allowed = is_transmission_allowed(&url, None, None, &context(), &mut log).is_ok();
        prop_assert_eq!(allowed, delta.abs() <= 128);
    }

    #[test]
    fn test_log_keeps_the_most_recent(count in 0usize..40, capacity in 1usize..10) {
        let mut log = TransmissionLog::with_capacity(capacity);
        let ctx = context();
        for i in 0..count {
            let payload = json!({ "seq": i });
            is_transmission_allowed(&telemetry("ptm.gif", ""), Some(&payload), None, &ctx, &mut log).unwrap();
        }
        let records = log.snapshot();
        prop_assert_eq!(records.len(), count.min(capacity));
        if let Some(last) = records.last() {
            prop_assert_eq!(last.get("seq"), Some(&json!(count - 1)));
        }
    }
}
