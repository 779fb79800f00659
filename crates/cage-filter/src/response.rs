//! Inbound response shaping
//!
//! The agent copies every key of a server response onto its own live object,
//! so a response is only passed on if its keys are known or at least cannot
//! overwrite anything the agent already holds.

use crate::error::{FilterError, FilterResult};
use serde_json::Value;

/// Response keys the agent is known to receive
pub const EXPECTED_RESPONSE_KEYS: [&str; 16] = [
    "autoOrdering",
    "designerEnabled",
    "features",
    "globalJsUrl",
    "guideCssUrl",
    "guideWidget",
    "guides",
    "lastGuideStepSeen",
    "normalizedUrl",
    "preventCodeInjection",
    "segmentFlags",
    "throttling",
    "props",
    "type",
    "children",
    "latestDismissedAutoAt",
];

/// Response as received from the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResponse<'a> {
    /// HTTP status
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<&'a str>,
    /// Body text, if any
    pub body: Option<&'a str>,
}

/// Response handed back to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredResponse {
    status: u16,
    body: Option<String>,
}

impl FilteredResponse {
    /// Empty success
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    /// Network failure as the agent would observe it (status 0, no body)
    #[must_use]
    pub fn network_error() -> Self {
        Self {
            status: 0,
            body: None,
        }
    }

    /// Response with a body
    #[must_use]
    pub fn with_body(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
        }
    }

    /// HTTP status (0 for a network error)
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Body text
    #[inline]
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Whether this is a network error
    #[inline]
    #[must_use]
    pub fn is_network_error(&self) -> bool {
        self.status == 0
    }
}

/// Shape a response before the agent sees it
///
/// `has_live_field` reports whether the agent's live object already holds a
/// field of that name.
///
/// # Errors
/// [`FilterError::ResponseShape`] if the body is not a JSON object, or an
/// unrecognized key would overwrite a live field
pub fn filter_response(
    raw: &RawResponse<'_>,
    has_live_field: impl Fn(&str) -> bool,
) -> FilterResult<FilteredResponse> {
    if !(200..300).contains(&raw.status) {
        return Ok(FilteredResponse::network_error());
    }
    let is_gif = raw
        .content_type
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/gif"));
    let Some(body) = raw.body.filter(|_| !is_gif) else {
        return Ok(FilteredResponse::empty());
    };

    let value: Value = serde_json::from_str(body)
        .map_err(|e| FilterError::response(format!("fetch response is not json: {e}")))?;
    let mut fields = match value {
        Value::Object(fields) => fields,
        Value::Array(_) => {
            return Err(FilterError::response(
                "fetch response is an array, not an object",
            ))
        }
        other => {
            return Err(FilterError::response(format!(
                "fetch response is not an object: {other}"
            )))
        }
    };

    let unexpected: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|k| !EXPECTED_RESPONSE_KEYS.contains(k))
        .collect();
    if !unexpected.is_empty() {
        tracing::warn!("fetch response has unexpected keys: {:?}", unexpected);
        if unexpected.iter().any(|k| has_live_field(k)) {
            return Err(FilterError::response(
                "unexpected key in fetch response would clobber an existing value",
            ));
        }
    }

    if fields.contains_key("guides") || fields.contains_key("preventCodeInjection") {
        if fields.get("preventCodeInjection") != Some(&Value::Bool(true)) {
            tracing::warn!(
                "expected preventCodeInjection to be set on a guide, but it wasn't; it has been set anyway"
            );
        }
        fields.insert("preventCodeInjection".to_string(), Value::Bool(true));
    }

    Ok(FilteredResponse::with_body(
        raw.status,
        Value::Object(fields).to_string(),
    ))
}
