//! Merged agent configuration
//!
//! The vendor tail and the caller's overrides both map option names to
//! [`StructuredValue`]s. Merging is one-directional: an override always
//! replaces a tail value, and a disagreement is only ever logged.

use cage_artifact::{RegexCodec, StructuredValue};
use indexmap::IndexMap;

/// Ordered map of agent option name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentConfig {
    entries: IndexMap<String, StructuredValue>,
}

impl AgentConfig {
    /// Create empty configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry (builder style)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<StructuredValue>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    /// Insert or replace an entry
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<StructuredValue>,
    ) -> Option<StructuredValue> {
        self.entries.insert(name.into(), value.into())
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StructuredValue> {
        self.entries.get(name)
    }

    /// Whether an entry is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StructuredValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `apiKey`
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.get("apiKey").and_then(StructuredValue::as_str)
    }

    /// `dataHost`, the telemetry host
    #[must_use]
    pub fn data_host(&self) -> Option<&str> {
        self.get("dataHost").and_then(StructuredValue::as_str)
    }

    /// `allowedOriginServers`, the origins guide content may come from
    #[must_use]
    pub fn allowed_origin_servers(&self) -> Vec<&str> {
        self.get("allowedOriginServers")
            .and_then(StructuredValue::as_array)
            .map(|items| items.iter().filter_map(StructuredValue::as_str).collect())
            .unwrap_or_default()
    }

    /// Merge `overrides` over this configuration
    ///
    /// Keys present on both sides are compared in their encoded form under
    /// `codec`, so regex values compare by pattern and flags. A mismatch is
    /// logged and the override wins.
    pub fn merge_overrides(&mut self, overrides: &AgentConfig, codec: &RegexCodec) {
        for (name, expected) in overrides.iter() {
            if let Some(actual) = self.entries.get(name) {
                let actual_text = codec.stringify(actual);
                let expected_text = codec.stringify(expected);
                if actual_text != expected_text {
                    tracing::warn!(
                        "agent option {} ({}) does not match expected value ({}), and will be overridden",
                        name,
                        actual_text,
                        expected_text
                    );
                }
            }
        }
        for (name, value) in overrides.iter() {
            self.entries.insert(name.to_string(), value.clone());
        }
    }

    /// Encode as a JSON object, regexes rendered as `/pattern/flags` strings
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let codec = RegexCodec::permissive();
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), codec.encode(v)))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<StructuredValue>> FromIterator<(K, V)> for AgentConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_artifact::RegexLiteral;

    #[test]
    fn override_wins_on_conflict() {
        let mut tail = AgentConfig::new()
            .with("apiKey", "vendor")
            .with("excludeAllText", false);
        let overrides = AgentConfig::new()
            .with("apiKey", "local")
            .with("requireHTTPS", true);

        tail.merge_overrides(&overrides, &RegexCodec::new("cafe"));

        assert_eq!(tail.api_key(), Some("local"));
        assert_eq!(tail.get("excludeAllText"), Some(&StructuredValue::Bool(false)));
        assert_eq!(tail.get("requireHTTPS"), Some(&StructuredValue::Bool(true)));
    }

    #[test]
    fn tail_order_is_kept_and_new_overrides_append() {
        let mut tail = AgentConfig::new().with("b", true).with("a", true);
        tail.merge_overrides(&AgentConfig::new().with("c", true).with("a", false), &RegexCodec::permissive());
        let names: Vec<_> = tail.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn typed_accessors() {
        let config: AgentConfig = [
            ("dataHost", StructuredValue::from("data.pendo.io")),
            (
                "allowedOriginServers",
                StructuredValue::Array(vec![
                    StructuredValue::from("https://guides.example.com"),
                    StructuredValue::Null,
                ]),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(config.data_host(), Some("data.pendo.io"));
        assert_eq!(config.allowed_origin_servers(), vec!["https://guides.example.com"]);
        assert_eq!(config.api_key(), None);
    }

    #[test]
    fn json_rendering_shows_regexes_as_literals() {
        let config = AgentConfig::new().with(
            "htmlAttributes",
            StructuredValue::Regex(RegexLiteral::new("^(tabindex)$", "")),
        );
        assert_eq!(
            config.to_json(),
            serde_json::json!({ "htmlAttributes": "/^(tabindex)$/" })
        );
    }
}
