//! Decoding what a request would transmit
//!
//! The agent sends telemetry either as a JSON post body or by reference,
//! through a `jzb` url parameter naming a payload it compressed earlier in
//! the same turn. Both forms are resolved to the JSON value they carry so
//! the allow-list sees the actual data.

use crate::error::{FilterError, FilterResult};
use serde_json::Value;
use url::Url;

/// Body handed to a mediated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Text body
    Text(String),
    /// Anything that is not text
    Binary(Vec<u8>),
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl RequestBody {
    fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Binary(b) => b.is_empty(),
        }
    }
}

/// Resolve the payload a request carries
///
/// `compressed` looks up a `jzb` token. An empty body counts as no body.
///
/// # Errors
/// [`FilterError::TransmissionDenied`] if both `jzb` and a body are given,
/// the token is unknown, or the body is not JSON text
pub fn decode_payload(
    url: &Url,
    body: Option<&RequestBody>,
    compressed: impl Fn(&str) -> Option<Value>,
) -> FilterResult<Option<Value>> {
    let body = body.filter(|b| !b.is_empty());
    let jzb = url
        .query_pairs()
        .find(|(k, _)| k == "jzb")
        .map(|(_, v)| v.into_owned());

    if let Some(token) = jzb {
        if body.is_some() {
            return Err(FilterError::denied(
                "agent tried to send both jzb and post data at once",
            ));
        }
        return compressed(&token).map(Some).ok_or_else(|| {
            FilterError::denied("agent tried to send jzb data missing from the compression map")
        });
    }

    match body {
        None => Ok(None),
        Some(RequestBody::Binary(_)) => Err(FilterError::denied("agent sent non-string post data")),
        Some(RequestBody::Text(text)) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| FilterError::denied(format!("agent sent post data that is not json: {e}"))),
    }
}

/// The error report a payload carries, if any
///
/// The agent reports its own failures, which the sandbox's restrictions
/// frequently cause. Such reports are answered locally and never sent.
#[must_use]
pub fn error_report(payload: Option<&Value>) -> Option<&Value> {
    payload?.get("error").filter(|v| is_truthy(v))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
