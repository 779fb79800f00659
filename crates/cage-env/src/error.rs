//! Error types for the sandbox environment
//!
//! Wraps the parser and filter errors so that one type flows out of every
//! environment operation.

use cage_filter::FilterError;
use cage_parser::AgentValidationError;
use std::path::PathBuf;

/// Errors raised by the sandbox environment
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The agent source failed validation
    #[error(transparent)]
    Validation(#[from] AgentValidationError),

    /// A filter or capability check failed
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The host network layer failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The agent handed over a url that does not parse
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A diagnostic slot was rebound to a different object
    #[error("overwriting {0} is not allowed")]
    Slot(&'static str),

    /// A write-once field received a second, different value
    #[error("only expected {0} to be set once")]
    WriteOnce(&'static str),

    /// No api key to fetch the agent with
    #[error("no apiKey configured")]
    MissingApiKey,

    /// The script loader refused the rewritten agent
    #[error("script load failed: {0}")]
    Load(String),

    /// Loading was abandoned before the agent became ready
    #[error("agent load was abandoned")]
    Abandoned,

    /// Sandbox configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SandboxError {
    /// Shorthand for a logged capability violation
    pub fn capability(message: impl Into<String>) -> Self {
        Self::Filter(FilterError::capability(message))
    }
}

/// Failure reported by a [`Fetcher`](crate::Fetcher)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FetchError(pub String);

/// Errors loading the sandbox configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error during file read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("invalid sandbox configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// An override could not be turned into an agent option value
    #[error("invalid override '{key}': {message}")]
    InvalidOverride { key: String, message: String },
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;
