//! Sandbox configuration file
//!
//! ```toml
//! [sandbox]
//! enforcement = "sealed"
//! ct_epsilon_ms = 128
//! transmission_capacity = 1024
//! agent_cdn = "https://cdn.pendo.io/agent/static"
//!
//! [overrides]
//! apiKey = "67c2f326-a6c2-4aa2-4559-08a53b679e93"
//! dataHost = "data.pendo.io"
//! htmlAttributes = { regex = "^(tabindex)$", flags = "" }
//! ```

use crate::error::ConfigError;
use cage_artifact::{RegexLiteral, StructuredValue};
use cage_filter::{Enforcement, DEFAULT_CT_EPSILON_MS, DEFAULT_TRANSMISSION_CAPACITY};
use cage_parser::AgentConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where agent releases are fetched from
pub const DEFAULT_AGENT_CDN: &str = "https://cdn.pendo.io/agent/static";

/// `[sandbox]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub enforcement: Enforcement,
    pub ct_epsilon_ms: i64,
    pub transmission_capacity: usize,
    pub agent_cdn: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enforcement: Enforcement::Sealed,
            ct_epsilon_ms: DEFAULT_CT_EPSILON_MS,
            transmission_capacity: DEFAULT_TRANSMISSION_CAPACITY,
            agent_cdn: DEFAULT_AGENT_CDN.to_string(),
        }
    }
}

impl SandboxSettings {
    /// Url of the agent release for `api_key`
    #[must_use]
    pub fn agent_url(&self, api_key: &str) -> String {
        format!("{}/{}/pendo.js", self.agent_cdn.trim_end_matches('/'), api_key)
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub sandbox: SandboxSettings,
    overrides: toml::Table,
}

impl SandboxConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    /// [`ConfigError::Toml`] for malformed input
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a file
    ///
    /// # Errors
    /// [`ConfigError::Io`] if unreadable, [`ConfigError::Toml`] if malformed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Agent option overrides
    ///
    /// # Errors
    /// [`ConfigError::InvalidOverride`] for values with no agent counterpart
    pub fn overrides(&self) -> Result<AgentConfig, ConfigError> {
        self.overrides
            .iter()
            .map(|(key, value)| Ok((key.clone(), to_structured(key, value)?)))
            .collect()
    }
}

fn to_structured(key: &str, value: &toml::Value) -> Result<StructuredValue, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidOverride {
        key: key.to_string(),
        message: message.to_string(),
    };
    Ok(match value {
        toml::Value::String(s) => StructuredValue::String(s.clone()),
        toml::Value::Boolean(b) => StructuredValue::Bool(*b),
        toml::Value::Integer(i) => StructuredValue::Number((*i).into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(StructuredValue::Number)
            .ok_or_else(|| invalid("non-finite number"))?,
        toml::Value::Datetime(d) => StructuredValue::String(d.to_string()),
        toml::Value::Array(items) => StructuredValue::Array(
            items
                .iter()
                .map(|item| to_structured(key, item))
                .collect::<Result<_, _>>()?,
        ),
        toml::Value::Table(table) => {
            if let Some(pattern) = table.get("regex") {
                let pattern = pattern.as_str().ok_or_else(|| invalid("regex must be a string"))?;
                let flags = match table.get("flags") {
                    Some(flags) => flags.as_str().ok_or_else(|| invalid("flags must be a string"))?,
                    None => "",
                };
                if table.keys().any(|k| k != "regex" && k != "flags") {
                    return Err(invalid("regex table takes only 'regex' and 'flags'"));
                }
                let literal = RegexLiteral::new(pattern, flags);
                literal.compile().map_err(|e| invalid(&e.to_string()))?;
                StructuredValue::Regex(literal)
            } else {
                StructuredValue::Object(
                    table
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), to_structured(key, v)?)))
                        .collect::<Result<_, ConfigError>>()?,
                )
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[sandbox]
enforcement = "unsealed"
ct_epsilon_ms = 64

[overrides]
apiKey = "key"
dataHost = "data.pendo.io"
allowedOriginServers = ["https://guides.example.com"]
requireHTTPS = true
xhrWhitelist = { }
htmlAttributes = { regex = "^(tabindex)$" }
"#;

    #[test]
    fn parses_settings_with_defaults() {
        let config = SandboxConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.sandbox.enforcement, Enforcement::Unsealed);
        assert_eq!(config.sandbox.ct_epsilon_ms, 64);
        assert_eq!(config.sandbox.transmission_capacity, DEFAULT_TRANSMISSION_CAPACITY);
        assert_eq!(
            config.sandbox.agent_url("key"),
            "https://cdn.pendo.io/agent/static/key/pendo.js"
        );
    }

    #[test]
    fn converts_overrides() {
        let overrides = SandboxConfig::from_toml_str(SAMPLE).unwrap().overrides().unwrap();
        assert_eq!(overrides.api_key(), Some("key"));
        assert_eq!(overrides.allowed_origin_servers(), vec!["https://guides.example.com"]);
        assert_eq!(
            overrides.get("htmlAttributes"),
            Some(&StructuredValue::Regex(RegexLiteral::new("^(tabindex)$", "")))
        );
        assert_eq!(
            overrides.get("xhrWhitelist"),
            Some(&StructuredValue::Object(Default::default()))
        );
    }

    #[test]
    fn rejects_bad_regex_override() {
        let config = SandboxConfig::from_toml_str(
            "[overrides]\nhtmlAttributes = { regex = \"(\", flags = \"\" }\n",
        )
        .unwrap();
        assert!(matches!(
            config.overrides(),
            Err(ConfigError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn empty_file_is_sealed() {
        let config = SandboxConfig::from_toml_str("").unwrap();
        assert!(config.sandbox.enforcement.is_sealed());
        assert!(config.overrides().unwrap().is_empty());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(SandboxConfig::load(&path).unwrap().sandbox.ct_epsilon_ms, 64);
        assert!(matches!(
            SandboxConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
