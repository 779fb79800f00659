//! Error types for agent source validation
//!
//! Every failure here is fatal to the load: there is no partially parsed
//! agent. The display form of each variant carries the common
//! `failed to validate pendo agent:` prefix so the message stands alone in
//! logs.

use cage_artifact::{ArtifactError, CodecError, FixupError, Integrity};

/// Errors raised while validating and rewriting an agent source
#[derive(Debug, thiserror::Error)]
pub enum AgentValidationError {
    /// A structural line did not match its expected shape
    #[error("failed to validate pendo agent: {0}")]
    Grammar(GrammarViolation),

    /// A tail line did not parse as a configuration entry or value
    #[error("failed to validate pendo agent: configuration value unparsable ({value})")]
    ConfigValue {
        value: String,
        #[source]
        source: Option<CodecError>,
    },

    /// The body digest has no fixup table
    #[error("failed to validate pendo agent: innerAgentIntegrity '{0}' not recognized")]
    DigestMismatch(Integrity),

    /// The matched fixup table does not fit the body
    #[error("failed to validate pendo agent: {0}")]
    Fixup(#[from] FixupError),

    /// The rewritten script violated an artifact invariant
    #[error("failed to validate pendo agent: {0}")]
    Artifact(#[from] ArtifactError),
}

impl AgentValidationError {
    /// Create grammar error
    #[inline]
    #[must_use]
    pub fn grammar(violation: GrammarViolation) -> Self {
        Self::Grammar(violation)
    }

    /// Create value error with the raw tail text
    pub fn config_value(value: impl Into<String>, source: Option<CodecError>) -> Self {
        Self::ConfigValue {
            value: value.into(),
            source,
        }
    }
}

/// Which part of the source grammar was violated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarViolation {
    /// Source ran out before a required line
    #[error("expected line missing")]
    MissingLine,

    /// A required line had the wrong shape
    #[error("line does not match expectations")]
    UnexpectedLine {
        /// 1-based line number in the source
        line: usize,
    },

    /// A tail line is not `name: value`
    #[error("configuration line unparsable")]
    UnparsableConfigLine {
        /// 1-based line number in the source
        line: usize,
    },
}

/// Result alias for agent validation
pub type ValidationResult<T> = Result<T, AgentValidationError>;
