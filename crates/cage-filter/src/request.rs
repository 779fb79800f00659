//! Outbound request allow-listing
//!
//! Only two request shapes ever leave the sandbox:
//!
//! - telemetry: `https://<dataHost>/data/<endpoint>/<apiKey>?jzb=..&v=..&ct=..`
//! - guide content: `https://<allowed origin>/guide-content/<..>.dom.json?sha256=..`
//!
//! Everything else is denied.

use crate::error::{FilterError, FilterResult};
use crate::transmissions::{Transmission, TransmissionLog};
use cage_parser::AgentConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

/// Allowed distance between a request's `ct` parameter and now
pub const DEFAULT_CT_EPSILON_MS: i64 = 128;

const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

static DATA_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/data/([^/]*)/(.*)$").expect("static regex"));
static GUIDE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/guide-content/.*\.dom\.json$").expect("static regex"));

/// Everything a request check needs to know about the sandbox
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    data_host: Option<String>,
    guide_hosts: Vec<String>,
    api_key: Option<String>,
    version: Option<String>,
    now_ms: i64,
    ct_epsilon_ms: i64,
}

impl FilterContext {
    /// Derive hosts from the merged agent configuration
    ///
    /// Unparsable entries in `allowedOriginServers` are skipped with a warning,
    /// which only ever narrows the allow-list.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        let guide_hosts = config
            .allowed_origin_servers()
            .into_iter()
            .filter_map(|origin| match Url::parse(origin) {
                Ok(url) => host_of(&url),
                Err(e) => {
                    tracing::warn!("ignoring unparsable allowed origin {}: {}", origin, e);
                    None
                }
            })
            .collect();
        Self {
            data_host: config.data_host().map(str::to_string),
            guide_hosts,
            ct_epsilon_ms: DEFAULT_CT_EPSILON_MS,
            ..Self::default()
        }
    }

    /// Set the telemetry host
    #[must_use]
    pub fn with_data_host(mut self, host: impl Into<String>) -> Self {
        self.data_host = Some(host.into());
        self
    }

    /// Add an allowed guide-content host (`host[:port]`)
    #[must_use]
    pub fn with_guide_host(mut self, host: impl Into<String>) -> Self {
        self.guide_hosts.push(host.into());
        self
    }

    /// Set the api key the agent registered
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<impl Into<String>>) -> Self {
        self.api_key = api_key.map(Into::into);
        self
    }

    /// Set the agent version the agent registered
    #[must_use]
    pub fn with_version(mut self, version: Option<impl Into<String>>) -> Self {
        self.version = version.map(Into::into);
        self
    }

    /// Set the current time
    #[must_use]
    pub fn at(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }

    /// Set the allowed `ct` distance
    #[must_use]
    pub fn with_ct_epsilon(mut self, epsilon_ms: i64) -> Self {
        self.ct_epsilon_ms = epsilon_ms;
        self
    }

    /// Guide-content hosts
    #[must_use]
    pub fn guide_hosts(&self) -> &[String] {
        &self.guide_hosts
    }
}

/// `host[:port]` of a url, port omitted when it is the scheme default
fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Check an outbound request against the allow-list
///
/// Allowed telemetry is recorded in `log`, one record per payload element.
///
/// # Errors
/// [`FilterError::TransmissionDenied`] naming the first violated rule
pub fn is_transmission_allowed(
    url: &Url,
    payload: Option<&Value>,
    integrity: Option<&str>,
    ctx: &FilterContext,
    log: &mut TransmissionLog,
) -> FilterResult<()> {
    if url.scheme() != "https" {
        return Err(FilterError::denied("fetch to non-https url not allowed"));
    }
    let host = host_of(url).unwrap_or_default();

    if ctx.data_host.as_deref().is_some_and(|d| !d.is_empty() && d == host) {
        let caps = DATA_PATH.captures(url.path()).ok_or_else(|| {
            FilterError::denied(format!("fetch from {host} does not match expected path"))
        })?;
        let endpoint = &caps[1];
        let api_key = &caps[2];
        if ctx.api_key.as_deref() != Some(api_key) {
            return Err(FilterError::denied(format!(
                "expected api key in url to match config ({api_key})"
            )));
        }
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "jzb" => {}
                "v" => {
                    if ctx.version.as_deref() != Some(v.as_ref()) {
                        return Err(FilterError::denied(
                            "attempted fetch with url parameter 'v' which does not match agent version",
                        ));
                    }
                }
                "ct" => check_ct(&v, ctx)?,
                _ => {
                    return Err(FilterError::denied(format!(
                        "attempted fetch with unexpected url parameter '{k}' = '{v}'"
                    )))
                }
            }
        }
        for transmission in Transmission::expand(endpoint, payload) {
            log.record(transmission);
        }
        Ok(())
    } else if ctx.guide_hosts.iter().any(|g| *g == host) {
        if !GUIDE_PATH.is_match(url.path()) {
            return Err(FilterError::denied(format!(
                "fetch from {host} does not match expected path"
            )));
        }
        let mut saw_integrity = false;
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "sha256" => {
                    if integrity != Some(format!("sha256-{v}").as_str()) {
                        return Err(FilterError::denied(
                            "expected integrity url parameter to match request's integrity value",
                        ));
                    }
                    saw_integrity = true;
                }
                _ => {
                    return Err(FilterError::denied(format!(
                        "attempted fetch with unexpected url parameter '{k}' = '{v}'"
                    )))
                }
            }
        }
        if !saw_integrity {
            return Err(FilterError::denied("expected integrity url parameter on request"));
        }
        Ok(())
    } else {
        Err(FilterError::denied(format!(
            "agent tried to fetch an unrecognized url ({url})"
        )))
    }
}

/// `ct` must be a canonical safe integer close to now
///
/// The value is agent-controlled, so the range is checked before any
/// arithmetic and the distance is taken with `checked_sub`.
fn check_ct(value: &str, ctx: &FilterContext) -> FilterResult<()> {
    let diff = value
        .parse::<i64>()
        .ok()
        .filter(|ct| ct.to_string() == value && ct.unsigned_abs() <= MAX_SAFE_INTEGER.unsigned_abs())
        .and_then(|ct| ct.checked_sub(ctx.now_ms))
        .map(i64::unsigned_abs)
        .filter(|diff| u64::try_from(ctx.ct_epsilon_ms).is_ok_and(|eps| *diff <= eps));
    match diff {
        Some(diff) => {
            tracing::debug!("ct diff {diff}");
            Ok(())
        }
        None => Err(FilterError::denied(format!(
            "attempted fetch with url parameter 'ct' out of expected range: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_artifact::StructuredValue;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;
    const KEY: &str = "67c2f326-a6c2-4aa2-4559-08a53b679e93";

    fn ctx() -> FilterContext {
        let config = AgentConfig::new().with("dataHost", "data.pendo.io").with(
            "allowedOriginServers",
            StructuredValue::Array(vec![StructuredValue::from(
                "https://pendo-static-6047664892149760.storage.googleapis.com",
            )]),
        );
        FilterContext::from_config(&config)
            .with_api_key(Some(KEY))
            .with_version(Some("2.117.0_prod"))
            .at(NOW)
    }

    fn check(url: &str, payload: Option<&Value>, integrity: Option<&str>) -> (FilterResult<()>, TransmissionLog) {
        let mut log = TransmissionLog::new();
        let result = is_transmission_allowed(&Url::parse(url).unwrap(), payload, integrity, &ctx(), &mut log);
        (result, log)
    }

    #[test]
    fn telemetry_with_expected_params_is_allowed_and_logged() {
        let url = format!("https://data.pendo.io/data/ptm.gif/{KEY}?v=2.117.0_prod&ct={}&jzb=abc", NOW + 100);
        let payload = json!([{ "type": "load" }, { "type": "click" }]);
        let (result, log) = check(&url, Some(&payload), None);
        assert_eq!(result, Ok(()));
        let records = log.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint(), "ptm.gif");
    }

    #[test]
    fn plain_http_is_denied() {
        let url = format!("http://data.pendo.io/data/ptm.gif/{KEY}?v=2.117.0_prod");
        let (result, log) = check(&url, None, None);
        assert!(matches!(result, Err(FilterError::TransmissionDenied(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn unknown_parameter_is_denied() {
        let url = format!("https://data.pendo.io/data/ptm.gif/{KEY}?v=2.117.0_prod&leak=1");
        let (result, log) = check(&url, None, None);
        assert!(result.is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn wrong_api_key_is_denied() {
        let (result, _) = check("https://data.pendo.io/data/ptm.gif/other", None, None);
        assert_eq!(
            result,
            Err(FilterError::TransmissionDenied(
                "expected api key in url to match config (other)".to_string()
            ))
        );
    }

    #[test]
    fn wrong_version_is_denied() {
        let url = format!("https://data.pendo.io/data/ptm.gif/{KEY}?v=2.118.0_prod");
        assert!(check(&url, None, None).0.is_err());
    }

    #[test]
    fn ct_must_be_canonical_and_close() {
        for ct in [
            format!("{}", NOW + 129),
            format!("{}", NOW - 129),
            format!("0{}", NOW),
            format!("+{}", NOW),
            format!("{}.0", NOW),
            "-0".to_string(),
            "9007199254740993".to_string(),
        ] {
            let url = format!("https://data.pendo.io/data/ptm.gif/{KEY}?ct={ct}");
            assert!(check(&url, None, None).0.is_err(), "ct {ct} should be denied");
        }
        for ct in [NOW, NOW + 128, NOW - 128] {
            let url = format!("https://data.pendo.io/data/ptm.gif/{KEY}?ct={ct}");
            assert!(check(&url, None, None).0.is_ok(), "ct {ct} should pass");
        }
    }

    #[test]
    fn ct_extremes_are_denied_without_overflow() {
        for ct in [
            i64::MIN.to_string(),
            i64::MAX.to_string(),
            (MAX_SAFE_INTEGER + 1).to_string(),
            (-MAX_SAFE_INTEGER - 1).to_string(),
        ] {
            let url = format!("https://data.pendo.io/data/ptm.gif/{KEY}?ct={ct}");
            assert_eq!(
                check(&url, None, None).0,
                Err(FilterError::TransmissionDenied(format!(
                    "attempted fetch with url parameter 'ct' out of expected range: {ct}"
                )))
            );
        }
    }

    #[test]
    fn ct_near_safe_limit_is_checked_against_now() {
        let far = FilterContext::from_config(&AgentConfig::new().with("dataHost", "data.pendo.io"))
            .with_api_key(Some(KEY))
            .at(i64::MIN);
        let url = Url::parse(&format!("https://data.pendo.io/data/ptm.gif/{KEY}?ct={MAX_SAFE_INTEGER}")).unwrap();
        let mut log = TransmissionLog::new();
        assert!(is_transmission_allowed(&url, None, None, &far, &mut log).is_err());

        let edge = far.at(MAX_SAFE_INTEGER);
        assert_eq!(is_transmission_allowed(&url, None, None, &edge, &mut log), Ok(()));
    }

    #[test]
    fn data_path_must_match() {
        let (result, _) = check("https://data.pendo.io/other/ptm.gif", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn guide_content_requires_matching_integrity() {
        let base = "https://pendo-static-6047664892149760.storage.googleapis.com/guide-content/abc/def.dom.json";
        let ok = format!("{base}?sha256=AAAA");
        assert_eq!(check(&ok, None, Some("sha256-AAAA")).0, Ok(()));
        assert!(check(&ok, None, Some("sha256-BBBB")).0.is_err());
        assert!(check(&ok, None, None).0.is_err());
        assert_eq!(
            check(base, None, Some("sha256-AAAA")).0,
            Err(FilterError::TransmissionDenied(
                "expected integrity url parameter on request".to_string()
            ))
        );
        let extra = format!("{base}?sha256=AAAA&x=1");
        assert!(check(&extra, None, Some("sha256-AAAA")).0.is_err());
    }

    #[test]
    fn guide_content_path_must_match() {
        let url = "https://pendo-static-6047664892149760.storage.googleapis.com/guide-content/x.js?sha256=AAAA";
        assert!(check(url, None, Some("sha256-AAAA")).0.is_err());
    }

    #[test]
    fn guide_content_is_not_logged() {
        let url = "https://pendo-static-6047664892149760.storage.googleapis.com/guide-content/a.dom.json?sha256=AAAA";
        let (result, log) = check(url, Some(&json!({ "a": 1 })), Some("sha256-AAAA"));
        assert!(result.is_ok());
        assert!(log.is_empty());
    }

    #[test]
    fn unknown_host_is_denied() {
        let (result, _) = check("https://evil.example.com/data/ptm.gif/x", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn missing_data_host_denies_telemetry() {
        let mut log = TransmissionLog::new();
        let ctx = FilterContext::default().with_api_key(Some(KEY)).at(NOW);
        let url = Url::parse(&format!("https://data.pendo.io/data/ptm.gif/{KEY}")).unwrap();
        assert!(is_transmission_allowed(&url, None, None, &ctx, &mut log).is_err());
    }

    #[test]
    fn guide_hosts_keep_explicit_ports() {
        let config = AgentConfig::new().with(
            "allowedOriginServers",
            StructuredValue::Array(vec![
                StructuredValue::from("https://guides.example.com:8443"),
                StructuredValue::from("https://cdn.example.com:443"),
                StructuredValue::from("not a url"),
            ]),
        );
        let ctx = FilterContext::from_config(&config);
        assert_eq!(ctx.guide_hosts(), ["guides.example.com:8443", "cdn.example.com"]);
    }
}
