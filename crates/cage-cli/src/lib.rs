//! Agent Cage command line
//!
//! Operator tooling over the sandbox crates: validate an agent release and
//! describe it, write its rewritten script, and try a url against the
//! transmission allow-list.

#![warn(unreachable_pub)]

use anyhow::{Context, Result};
use cage_artifact::Integrity;
use cage_env::{known_fixup_tables, SandboxConfig, EXPECTED_AGENT_VERSION};
use cage_filter::{
    decode_payload, is_transmission_allowed, Clock, FilterContext, RequestBody, SystemClock,
    Transmission, TransmissionLog,
};
use cage_parser::{parse_agent, AgentConfig, FixupTables, ParsedAgent};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use url::Url;

/// `agent-cage` arguments
#[derive(Debug, Parser)]
#[command(name = "agent-cage", version, about = "Validate, rewrite and filter a sandboxed telemetry agent")]
pub struct Cli {
    /// Sandbox configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// What to do
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate an agent source and describe it
    Inspect {
        /// Agent source file
        source: PathBuf,
    },
    /// Validate an agent source and write the rewritten script
    Rewrite {
        /// Agent source file
        source: PathBuf,
        /// Where to write the script; stdout if absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check one request against the transmission allow-list
    CheckUrl {
        /// Request url
        url: String,
        /// Post body
        #[arg(long)]
        body: Option<String>,
        /// Request integrity value (`sha256-...`)
        #[arg(long)]
        integrity: Option<String>,
        /// Api key the agent registered; defaults to the configured `apiKey`
        #[arg(long)]
        api_key: Option<String>,
        /// Agent version the agent registered
        #[arg(long, default_value = EXPECTED_AGENT_VERSION)]
        agent_version: String,
        /// Current time in milliseconds; the system clock if absent
        #[arg(long)]
        now: Option<i64>,
    },
}

/// Install the global subscriber: `RUST_LOG` filter, default `info`, on stderr
///
/// # Errors
/// If a global subscriber is already installed
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

/// The configuration at `path`, or the sealed default
///
/// # Errors
/// If the file cannot be read or parsed
pub fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => SandboxConfig::load(path)
            .with_context(|| format!("failed to load sandbox config {}", path.display())),
        None => Ok(SandboxConfig::default()),
    }
}

/// What `inspect` reports about a release
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub environment: String,
    pub version: String,
    pub installed: String,
    pub body_integrity: Integrity,
    pub script_integrity: Integrity,
    pub script_bytes: usize,
    pub config: serde_json::Value,
}

impl<H> From<&ParsedAgent<H>> for Inspection {
    fn from(agent: &ParsedAgent<H>) -> Self {
        let header = agent.header();
        Self {
            environment: header.environment().to_string(),
            version: header.version().to_string(),
            installed: header.installed().to_rfc3339(),
            body_integrity: *agent.body_integrity(),
            script_integrity: *agent.script().integrity(),
            script_bytes: agent.script().content().len(),
            config: agent.config().to_json(),
        }
    }
}

/// Outcome of `check-url`
#[derive(Debug, Clone, Serialize)]
pub struct UrlCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub transmissions: Vec<Transmission>,
}

/// Filter context from the configured overrides and the given agent state
///
/// # Errors
/// If the configured overrides are invalid
pub fn filter_context(
    config: &SandboxConfig,
    api_key: Option<String>,
    agent_version: &str,
    now_ms: i64,
) -> Result<FilterContext> {
    let overrides = config.overrides()?;
    let api_key = api_key.or_else(|| overrides.api_key().map(str::to_string));
    Ok(FilterContext::from_config(&overrides)
        .with_api_key(api_key)
        .with_version(Some(agent_version))
        .with_ct_epsilon(config.sandbox.ct_epsilon_ms)
        .at(now_ms))
}

/// Decode and check one request
///
/// There is no compression map outside a running sandbox, so any `jzb`
/// parameter is denied.
///
/// # Errors
/// If `url` does not parse
pub fn check_url(
    url: &str,
    body: Option<&str>,
    integrity: Option<&str>,
    ctx: &FilterContext,
) -> Result<UrlCheck> {
    let url = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
    let body = body.map(RequestBody::from);
    let mut log = TransmissionLog::new();
    let result = decode_payload(&url, body.as_ref(), |_| None)
        .and_then(|payload| is_transmission_allowed(&url, payload.as_ref(), integrity, ctx, &mut log));
    Ok(UrlCheck {
        allowed: result.is_ok(),
        reason: result.err().map(|e| e.to_string()),
        transmissions: log.snapshot(),
    })
}

fn parse_file<H: Clone>(
    path: &Path,
    overrides: &AgentConfig,
    tables: &FixupTables<H>,
) -> Result<ParsedAgent<H>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_agent(&source, overrides, tables)
        .with_context(|| format!("{} is not an acceptable agent", path.display()))
}

/// Run a command against the known releases
///
/// Returns `false` when the command completed but its verdict is negative.
///
/// # Errors
/// Unreadable inputs, invalid configuration and rejected agents
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<bool> {
    run_with_tables(cli, &known_fixup_tables(), out)
}

/// Run a command against the given releases
///
/// # Errors
/// See [`run`]
pub fn run_with_tables<H: Clone>(
    cli: &Cli,
    tables: &FixupTables<H>,
    out: &mut dyn Write,
) -> Result<bool> {
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!("enforcement {}", config.sandbox.enforcement);

    match &cli.command {
        Command::Inspect { source } => {
            let agent = parse_file(source, &config.overrides()?, tables)?;
            serde_json::to_writer_pretty(&mut *out, &Inspection::from(&agent))?;
            writeln!(out)?;
            Ok(true)
        }
        Command::Rewrite { source, output } => {
            let agent = parse_file(source, &config.overrides()?, tables)?;
            let script = agent.script();
            match output {
                Some(path) => {
                    std::fs::write(path, script.content())
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!("wrote {} with integrity {}", path.display(), script.integrity());
                    writeln!(out, "{}", script.integrity())?;
                }
                None => out.write_all(script.content().as_bytes())?,
            }
            Ok(true)
        }
        Command::CheckUrl {
            url,
            body,
            integrity,
            api_key,
            agent_version,
            now,
        } => {
            let now = now.unwrap_or_else(|| SystemClock.now_millis());
            let ctx = filter_context(&config, api_key.clone(), agent_version, now)?;
            let check = check_url(url, body.as_deref(), integrity.as_deref(), &ctx)?;
            serde_json::to_writer_pretty(&mut *out, &check)?;
            writeln!(out)?;
            Ok(check.allowed)
        }
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
