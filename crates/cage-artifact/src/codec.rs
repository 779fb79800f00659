//! JSON codec that round-trips regular-expression literals
//!
//! The agent's configuration tail legitimately contains regex literals such
//! as `/^(tabindex)$/`, which plain JSON cannot represent. The codec encodes a
//! regex as a string `marker + "/pattern/flags"`, where the marker is a fresh
//! random token per parse so an ordinary string can never be mistaken for one.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

static REGEX_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(.*)/([a-z]*)$").expect("static regex"));

/// A JavaScript-style regex literal (`/pattern/flags`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegexLiteral {
    pattern: String,
    flags: String,
}

impl RegexLiteral {
    /// Create literal from pattern and flags
    #[inline]
    #[must_use]
    pub fn new(pattern: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    /// Parse `/pattern/flags`
    #[must_use]
    pub fn parse(literal: &str) -> Option<Self> {
        REGEX_LITERAL
            .captures(literal)
            .map(|caps| Self::new(&caps[1], &caps[2]))
    }

    /// Pattern source
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Flag letters
    #[inline]
    #[must_use]
    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Compile with the `regex` crate
    ///
    /// `i`, `m` and `s` map onto the builder; `g`, `u`, `y` and `d` only
    /// affect JavaScript matching state and are ignored.
    ///
    /// # Errors
    /// Returns error for unknown flags or a pattern the engine rejects
    pub fn compile(&self) -> Result<Regex, CodecError> {
        let mut builder = regex::RegexBuilder::new(&self.pattern);
        for flag in self.flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'g' | 'u' | 'y' | 'd' => {}
                other => return Err(CodecError::UnknownFlag(other)),
            }
        }
        builder
            .build()
            .map_err(|e| CodecError::InvalidPattern(e.to_string()))
    }
}

impl Display for RegexLiteral {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.flags)
    }
}

/// JSON value extended with regex literals
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<StructuredValue>),
    Object(BTreeMap<String, StructuredValue>),
    Regex(RegexLiteral),
}

impl StructuredValue {
    /// String content, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements, if this is an array
    #[must_use]
    pub fn as_array(&self) -> Option<&[StructuredValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Regex literal, if this is one
    #[must_use]
    pub fn as_regex(&self) -> Option<&RegexLiteral> {
        match self {
            Self::Regex(r) => Some(r),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for StructuredValue {
    /// Plain conversion; strings are never reinterpreted as regexes
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for StructuredValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<bool> for StructuredValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<RegexLiteral> for StructuredValue {
    fn from(value: RegexLiteral) -> Self {
        Self::Regex(value)
    }
}

/// Regex-aware JSON codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexCodec {
    marker: String,
}

impl RegexCodec {
    /// Create codec with an explicit marker
    #[inline]
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Create codec with a fresh 16-byte random marker
    #[must_use]
    pub fn with_random_marker() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self::new(crate::digest::to_hex(&bytes))
    }

    /// Codec with an empty marker: any string shaped like `/.../flags` is a regex
    #[inline]
    #[must_use]
    pub fn permissive() -> Self {
        Self::new("")
    }

    /// The marker prefix
    #[inline]
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Encode a regex literal the way [`RegexCodec::parse`] expects to find it
    #[must_use]
    pub fn mark(&self, literal: &str) -> String {
        format!("{}{}", self.marker, literal)
    }

    /// Parse JSON text, decoding marked strings into regexes
    ///
    /// # Errors
    /// Returns error if the text is not JSON, or if a marked string is not a regex
    pub fn parse(&self, text: &str) -> Result<StructuredValue, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        self.decode(value)
    }

    /// Decode an already-parsed JSON value
    ///
    /// # Errors
    /// Returns [`CodecError::NotARegex`] if a marked string is not a regex literal
    pub fn decode(&self, value: serde_json::Value) -> Result<StructuredValue, CodecError> {
        use serde_json::Value;
        Ok(match value {
            Value::String(s) => self.decode_string(s)?,
            Value::Array(items) => StructuredValue::Array(
                items
                    .into_iter()
                    .map(|v| self.decode(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => StructuredValue::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.decode(v)?)))
                    .collect::<Result<_, CodecError>>()?,
            ),
            other => StructuredValue::from(other),
        })
    }

    fn decode_string(&self, s: String) -> Result<StructuredValue, CodecError> {
        let Some(rest) = s.strip_prefix(self.marker.as_str()) else {
            return Ok(StructuredValue::String(s));
        };
        match RegexLiteral::parse(rest) {
            Some(literal) => Ok(StructuredValue::Regex(literal)),
            None if !self.marker.is_empty() => Err(CodecError::NotARegex(rest.to_string())),
            None => Ok(StructuredValue::String(s)),
        }
    }

    /// Encode into plain JSON, regexes becoming marked strings
    #[must_use]
    pub fn encode(&self, value: &StructuredValue) -> serde_json::Value {
        use serde_json::Value;
        match value {
            StructuredValue::Null => Value::Null,
            StructuredValue::Bool(b) => Value::Bool(*b),
            StructuredValue::Number(n) => Value::Number(n.clone()),
            StructuredValue::String(s) => Value::String(s.clone()),
            StructuredValue::Array(items) => {
                Value::Array(items.iter().map(|v| self.encode(v)).collect())
            }
            StructuredValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.encode(v)))
                    .collect(),
            ),
            StructuredValue::Regex(literal) => Value::String(self.mark(&literal.to_string())),
        }
    }

    /// Serialize to JSON text
    #[must_use]
    pub fn stringify(&self, value: &StructuredValue) -> String {
        self.encode(value).to_string()
    }
}

/// Errors from the structured-value codec
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input was not JSON
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A marked string did not hold a regex literal
    #[error("matched regex marker, but {0} is not a regex")]
    NotARegex(String),

    /// Flag letter outside the JavaScript set
    #[error("unknown regex flag '{0}'")]
    UnknownFlag(char),

    /// Pattern rejected by the regex engine
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_round_trips_through_marker() {
        let codec = RegexCodec::new("deadbeef");
        let mut map = BTreeMap::new();
        map.insert("foo".to_string(), StructuredValue::from("bar"));
        map.insert(
            "bar".to_string(),
            StructuredValue::Regex(RegexLiteral::new(r"^\\\/b\az$", "gi")),
        );
        let value = StructuredValue::Object(map);

        let text = codec.stringify(&value);
        assert!(text.contains("deadbeef/"));
        assert_eq!(codec.parse(&text).unwrap(), value);
    }

    #[test]
    fn marked_non_regex_is_an_error() {
        let codec = RegexCodec::new("foo");
        let err = codec.parse(r#"{"bar":"foobar"}"#).unwrap_err();
        assert_eq!(err.to_string(), "matched regex marker, but bar is not a regex");
    }

    #[test]
    fn permissive_codec_reads_bare_regex_strings() {
        let codec = RegexCodec::permissive();
        let value = codec.parse(r#"{"bar":"/baz/"}"#).unwrap();
        let StructuredValue::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(map["bar"], StructuredValue::Regex(RegexLiteral::new("baz", "")));
    }

    #[test]
    fn permissive_codec_keeps_plain_strings() {
        let codec = RegexCodec::permissive();
        let value = codec.parse(r#"{"bar":"foobar"}"#).unwrap();
        let StructuredValue::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(map["bar"], StructuredValue::from("foobar"));
    }

    #[test]
    fn unmarked_slashes_stay_strings() {
        let codec = RegexCodec::new("cafe");
        let value = codec.parse(r#""/not/a/regex/""#).unwrap();
        assert_eq!(value, StructuredValue::from("/not/a/regex/"));
    }

    #[test]
    fn random_markers_differ() {
        let a = RegexCodec::with_random_marker();
        let b = RegexCodec::with_random_marker();
        assert_eq!(a.marker().len(), 32);
        assert_ne!(a.marker(), b.marker());
    }

    #[test]
    fn literal_compiles_with_flags() {
        let re = RegexLiteral::new("^(tabindex)$", "i").compile().unwrap();
        assert!(re.is_match("TABINDEX"));
        assert!(!re.is_match("onclick"));
    }

    #[test]
    fn literal_rejects_unknown_flag() {
        let err = RegexLiteral::new("a", "x").compile().unwrap_err();
        assert!(matches!(err, CodecError::UnknownFlag('x')));
    }

    #[test]
    fn literal_display() {
        assert_eq!(RegexLiteral::new("a+", "g").to_string(), "/a+/g");
        assert_eq!(RegexLiteral::parse("/a/b/im"), Some(RegexLiteral::new("a/b", "im")));
    }
}
