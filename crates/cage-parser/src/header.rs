//! Agent wrapper header
//!
//! Five fixed lines precede the body: the wrapper banner, the environment,
//! the agent version, the install timestamp and the opening of the wrapper
//! function. Each is matched exactly and kept verbatim for the rewritten
//! script.

use crate::error::{AgentValidationError, GrammarViolation, ValidationResult};
use crate::lines::LineCursor;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{self, Display, Formatter};

static BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^// Pendo Agent Wrapper$").expect("static regex"));
static ENVIRONMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^// Environment:\s+(production|staging)$").expect("static regex")
});
static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^// Agent Version:\s+((?:\d+\.)*\d+)$").expect("static regex"));
static INSTALLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^// Installed:\s+(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})Z$").expect("static regex")
});
static OPENING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(function \(PendoConfig\) \{$").expect("static regex"));

/// Deployment environment named in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEnvironment {
    Production,
    Staging,
}

impl AgentEnvironment {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            _ => None,
        }
    }
}

impl Display for AgentEnvironment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
        }
    }
}

/// Parsed header of an agent source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHeader {
    lines: Vec<String>,
    environment: AgentEnvironment,
    version: String,
    installed: DateTime<Utc>,
}

impl AgentHeader {
    /// Consume and validate the five header lines
    pub(crate) fn consume(cursor: &mut LineCursor<'_>) -> ValidationResult<Self> {
        let banner = cursor.expect(&BANNER)?;

        let line_no = cursor.line_number();
        let env_line = cursor.expect(&ENVIRONMENT)?;
        let environment = ENVIRONMENT
            .captures(env_line)
            .and_then(|caps| AgentEnvironment::from_name(&caps[1]))
            .ok_or_else(|| unexpected(line_no))?;

        let version_line = cursor.expect(&VERSION)?;
        let version = VERSION
            .captures(version_line)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();

        let line_no = cursor.line_number();
        let installed_line = cursor.expect(&INSTALLED)?;
        let installed = INSTALLED
            .captures(installed_line)
            .and_then(|caps| NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%dT%H:%M:%S").ok())
            .map(|naive| naive.and_utc())
            .ok_or_else(|| unexpected(line_no))?;

        let opening = cursor.expect(&OPENING)?;

        Ok(Self {
            lines: [banner, env_line, version_line, installed_line, opening]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            environment,
            version,
            installed,
        })
    }

    /// Header environment
    #[inline]
    #[must_use]
    pub fn environment(&self) -> AgentEnvironment {
        self.environment
    }

    /// Dotted agent version as written in the header
    #[inline]
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Install timestamp
    #[inline]
    #[must_use]
    pub fn installed(&self) -> DateTime<Utc> {
        self.installed
    }

    /// Header text exactly as it appeared, lines joined with `\n`
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

fn unexpected(line: usize) -> AgentValidationError {
    AgentValidationError::Grammar(GrammarViolation::UnexpectedLine { line })
}
