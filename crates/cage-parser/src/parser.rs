//! Agent source parser
//!
//! Splits a vendor agent into header, body and configuration tail, merges
//! the tail with caller overrides, pins the body against the known fixup
//! tables and produces the rewritten script.
//!
//! ```text
//! // Pendo Agent Wrapper                  ┐
//! // Environment: production              │ header (kept verbatim)
//! // Agent Version: 2.117.0               │
//! // Installed: 2021-10-18T19:14:04Z      │
//! (function (PendoConfig) {               ┘
//! ...minified body...                       body (digest-pinned, fixed up)
//! })({                                      body close
//!   apiKey: "...",                          tail (one option per line)
//! });                                       closing line
//! ```

use crate::config::AgentConfig;
use crate::error::{AgentValidationError, GrammarViolation, ValidationResult};
use crate::header::AgentHeader;
use crate::lines::LineCursor;
use crate::tables::FixupTables;
use cage_artifact::{
    apply_fixups, AgentScript, Artifact, Integrity, RegexCodec, StructuredValue,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static BODY_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\}\)\(\{$").expect("static regex"));
static CLOSING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\}\);$").expect("static regex"));
static BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*$").expect("static regex"));
static TAIL_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([a-zA-Z][a-zA-Z0-9]*)\s*:\s*(.*?)\s*,?\s*$").expect("static regex")
});
static REGEX_IN_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/((?:\\/|[^/])*)/([a-z]*)").expect("static regex"));

/// Caller tail appended after the patched body
pub const SCRIPT_TAIL: &str = "})(pendoEnv.PendoConfig);\n";

/// The rewritten, loadable agent script and its digest
pub type RewrittenArtifact = Artifact<AgentScript>;

/// A validated agent
#[derive(Debug, Clone)]
pub struct ParsedAgent<H> {
    header: AgentHeader,
    config: AgentConfig,
    body_integrity: Integrity,
    helpers: H,
    script: RewrittenArtifact,
}

impl<H> ParsedAgent<H> {
    /// Header as found in the source
    #[inline]
    #[must_use]
    pub fn header(&self) -> &AgentHeader {
        &self.header
    }

    /// Tail configuration merged with overrides
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Digest of the untouched body
    #[inline]
    #[must_use]
    pub fn body_integrity(&self) -> &Integrity {
        &self.body_integrity
    }

    /// Helper factory bound to the matched fixup set
    #[inline]
    #[must_use]
    pub fn helpers(&self) -> &H {
        &self.helpers
    }

    /// Rewritten script
    #[inline]
    #[must_use]
    pub fn script(&self) -> &RewrittenArtifact {
        &self.script
    }

    /// Split into configuration, helper factory and script
    #[must_use]
    pub fn into_parts(self) -> (AgentConfig, H, RewrittenArtifact) {
        (self.config, self.helpers, self.script)
    }
}

/// Validate and rewrite an agent source
///
/// A fresh random codec marker is drawn for every call.
///
/// # Errors
/// See [`parse_agent_with_codec`]
pub fn parse_agent<H: Clone>(
    source: &str,
    overrides: &AgentConfig,
    tables: &FixupTables<H>,
) -> ValidationResult<ParsedAgent<H>> {
    parse_agent_with_codec(source, overrides, tables, &RegexCodec::with_random_marker())
}

/// Validate and rewrite an agent source using a specific codec
///
/// # Errors
/// - [`AgentValidationError::Grammar`] if a structural or tail line is malformed
/// - [`AgentValidationError::ConfigValue`] if a tail value cannot be decoded
/// - [`AgentValidationError::DigestMismatch`] if the body is not a known release
/// - [`AgentValidationError::Fixup`] if the release's fixups do not fit the body
pub fn parse_agent_with_codec<H: Clone>(
    source: &str,
    overrides: &AgentConfig,
    tables: &FixupTables<H>,
    codec: &RegexCodec,
) -> ValidationResult<ParsedAgent<H>> {
    let mut cursor = LineCursor::new(source);
    let header = AgentHeader::consume(&mut cursor)?;

    let mut body_lines = Vec::new();
    while let Some(line) = cursor.peek() {
        if BODY_CLOSE.is_match(line) {
            break;
        }
        body_lines.push(line);
        cursor.next_line();
    }
    cursor.expect(&BODY_CLOSE)?;
    cursor.expect_last(&CLOSING)?;

    let mut config = parse_tail(&mut cursor, codec)?;
    config.merge_overrides(overrides, codec);

    let body = body_lines.join("\n");
    let body_integrity = Integrity::compute(body.as_bytes());
    tracing::debug!("agent body integrity: {}", body_integrity);
    let entry = tables
        .get(&body_integrity)
        .ok_or(AgentValidationError::DigestMismatch(body_integrity))?;

    let patched = apply_fixups(&body, entry.fixups())?;
    let script = RewrittenArtifact::new(format!("{}\n{}\n{}", header.text(), patched, SCRIPT_TAIL))?;
    tracing::info!(
        "validated agent {} ({} fixups), rewritten integrity {}",
        header.version(),
        entry.fixups().len(),
        script.integrity()
    );

    Ok(ParsedAgent {
        header,
        config,
        body_integrity,
        helpers: entry.helpers().clone(),
        script,
    })
}

fn parse_tail(cursor: &mut LineCursor<'_>, codec: &RegexCodec) -> ValidationResult<AgentConfig> {
    let mut config = AgentConfig::new();
    while !cursor.is_empty() {
        let line_no = cursor.line_number();
        let Some(line) = cursor.next_line() else {
            break;
        };
        if BLANK.is_match(line) {
            continue;
        }
        let caps = TAIL_ENTRY.captures(line).ok_or(AgentValidationError::Grammar(
            GrammarViolation::UnparsableConfigLine { line: line_no },
        ))?;
        config.insert(&caps[1], parse_value(&caps[2], codec)?);
    }
    Ok(config)
}

/// Decode one tail value: strict JSON, else JSON with embedded regex literals
fn parse_value(raw: &str, codec: &RegexCodec) -> ValidationResult<StructuredValue> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        return Ok(StructuredValue::from(value));
    }
    let marked = REGEX_IN_VALUE.replace_all(raw, |caps: &Captures<'_>| {
        serde_json::Value::String(codec.mark(&caps[0])).to_string()
    });
    codec
        .parse(&marked)
        .map_err(|e| AgentValidationError::config_value(raw, Some(e)))
}
