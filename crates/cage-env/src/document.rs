//! Document substitute
//!
//! The agent sees this in place of the real document. Element creation is
//! restricted, cookie writes go nowhere, and everything else is delegated.

use crate::env::SandboxEnv;
use crate::error::{SandboxError, SandboxResult};
use crate::ports::{HostDocument, HostElement};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Element returned to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementHandle {
    /// Answer to the agent's SRI feature probe; reports `integrity` support
    /// and nothing else
    IntegrityProbe,
    /// Element created by the host
    Host(HostElement),
}

impl ElementHandle {
    /// Whether the element claims `integrity` support
    #[must_use]
    pub fn has_integrity(&self) -> bool {
        matches!(self, Self::IntegrityProbe)
    }
}

/// Document the agent is given
#[derive(Clone)]
pub struct SandboxDocument {
    env: Arc<SandboxEnv>,
    host: Arc<dyn HostDocument>,
}

impl fmt::Debug for SandboxDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxDocument").finish_non_exhaustive()
    }
}

impl SandboxDocument {
    /// Wrap the host document
    #[must_use]
    pub fn new(env: Arc<SandboxEnv>, host: Arc<dyn HostDocument>) -> Self {
        Self { env, host }
    }

    /// `createElement`
    ///
    /// The first `script` is the agent probing for SRI support: it is
    /// answered here, and the load fails outright without support, since the
    /// agent would otherwise quietly stop checking integrity.
    ///
    /// # Errors
    /// Capability violation if SRI is unsupported, or for any later `script`
    /// or `iframe`
    pub fn create_element(&self, tag: &str) -> SandboxResult<ElementHandle> {
        if tag == "script" && self.env.take_first_script_probe() {
            if !self.host.supports_integrity() {
                return Err(SandboxError::capability("expected SRI support"));
            }
            return Ok(ElementHandle::IntegrityProbe);
        }
        if matches!(tag, "script" | "iframe") {
            return Err(SandboxError::capability(format!(
                "document.createElement('{tag}') denied"
            )));
        }
        Ok(ElementHandle::Host(self.host.create_element(tag)))
    }

    /// Read a document property
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        self.host.property(name)
    }

    /// Write a document property; `cookie` writes are dropped
    pub fn set_property(&self, name: &str, value: Value) {
        if name == "cookie" {
            tracing::debug!("discarding document.cookie write");
            return;
        }
        self.host.set_property(name, value);
    }
}
