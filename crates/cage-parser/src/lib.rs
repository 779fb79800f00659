//! Agent Cage Parser
//!
//! Validates a vendor agent source against its fixed wrapper grammar, decodes
//! and merges its configuration tail, pins the body to a known release and
//! emits the rewritten, integrity-pinned script.
//!
//! # Example
//!
//! ```rust,ignore
//! use cage_parser::{parse_agent, AgentConfig, FixupTables};
//!
//! let overrides = AgentConfig::new().with("apiKey", "67c2f326-...");
//! let agent = parse_agent(&source, &overrides, &tables)?;
//! loader.load(agent.script().content(), agent.script().integrity());
//! ```

#![warn(unreachable_pub)]

mod config;
mod error;
mod header;
mod lines;
mod parser;
mod tables;

pub use config::AgentConfig;
pub use error::{AgentValidationError, GrammarViolation, ValidationResult};
pub use header::{AgentEnvironment, AgentHeader};
pub use parser::{
    parse_agent, parse_agent_with_codec, ParsedAgent, RewrittenArtifact, SCRIPT_TAIL,
};
pub use tables::FixupTables;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
