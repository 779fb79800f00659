//! Fixup helpers
//!
//! The fixed set of capabilities that patched agent code calls through
//! `pendoFixupHelpers.<name>`. The set is built once per environment and
//! cannot be extended.

use crate::env::SandboxEnv;
use crate::error::{SandboxError, SandboxResult};
use crate::storage::{StorageArea, StorageFacade};
use crate::transport::{filtered_ajax, AjaxRequest, AjaxResponse};
use cage_filter::filter_guide_tag;
use serde_json::Value;
use std::sync::Arc;

/// Every name patched code may call
///
/// `recursionDepth` is the name the patch text uses for
/// `stringEscapeRecursionDepth`.
pub const HELPER_NAMES: [&str; 11] = [
    "stringEscapeRecursionDepth",
    "recursionDepth",
    "template",
    "attemptedCodeInjection",
    "openXhrIntercept",
    "compress",
    "cookieStorage",
    "localStorage",
    "sessionStorage",
    "filterGuideTag",
    "filteredAjax",
];

/// Builds the helpers for one environment
pub type HelperFactory = fn(Arc<SandboxEnv>) -> FixupHelpers;

/// Capabilities reachable from patched agent code
#[derive(Debug, Clone)]
pub struct FixupHelpers {
    env: Arc<SandboxEnv>,
}

impl FixupHelpers {
    /// Helpers bound to `env`
    #[must_use]
    pub fn new(env: Arc<SandboxEnv>) -> Self {
        Self { env }
    }

    /// The environment the helpers act on
    #[inline]
    #[must_use]
    pub fn env(&self) -> &Arc<SandboxEnv> {
        &self.env
    }

    /// Whether `name` is one of the helpers
    #[must_use]
    pub fn has_helper(name: &str) -> bool {
        HELPER_NAMES.contains(&name)
    }

    fn blocked(&self, message: &'static str) -> SandboxResult<()> {
        if self.env.is_sealed() {
            return Err(SandboxError::capability(message));
        }
        tracing::warn!("{}, but proceeding because environment is unsealed", message);
        Ok(())
    }

    /// Reached when the agent's string escaper nests deep enough to give up
    ///
    /// # Errors
    /// Capability violation when sealed
    pub fn string_escape_recursion_depth(&self) -> SandboxResult<()> {
        self.blocked("string escape recursion depth exceeded")
    }

    /// Alias the patch text calls
    ///
    /// # Errors
    /// Capability violation when sealed
    pub fn recursion_depth(&self) -> SandboxResult<()> {
        self.string_escape_recursion_depth()
    }

    /// Reached at the agent's template compiler
    ///
    /// # Errors
    /// Capability violation when sealed
    pub fn template(&self) -> SandboxResult<()> {
        self.blocked("_.template() is forbidden")
    }

    /// Reached wherever the agent would inject a script or frame
    ///
    /// # Errors
    /// Capability violation when sealed
    pub fn attempted_code_injection(&self) -> SandboxResult<()> {
        self.blocked("attempted code injection blocked")
    }

    /// Reached where the agent would wrap the page's XHR to spy on requests
    ///
    /// # Errors
    /// Capability violation when sealed
    pub fn open_xhr_intercept(&self) -> SandboxResult<()> {
        self.blocked("openXHRIntercept blocked")
    }

    /// Remember what a compression token stands for, for this turn
    pub fn compress(&self, payload: &Value, token: &str) {
        self.env.remember_compressed(token, payload.clone());
    }

    /// Cookie storage
    #[must_use]
    pub fn cookie_storage(&self) -> StorageFacade {
        StorageFacade::new(Arc::clone(&self.env), StorageArea::Cookie)
    }

    /// `localStorage`
    #[must_use]
    pub fn local_storage(&self) -> StorageFacade {
        StorageFacade::new(Arc::clone(&self.env), StorageArea::Local)
    }

    /// `sessionStorage`
    #[must_use]
    pub fn session_storage(&self) -> StorageFacade {
        StorageFacade::new(Arc::clone(&self.env), StorageArea::Session)
    }

    /// Check a guide element before it is rendered
    ///
    /// Only checked when sealed. Returns `true` when the element may render.
    ///
    /// # Errors
    /// Capability violation for a denied element
    pub fn filter_guide_tag(&self, attributes: &[(&str, &str)], tag: &str) -> SandboxResult<bool> {
        if self.env.is_sealed() {
            filter_guide_tag(tag, attributes.iter().copied())?;
        }
        Ok(true)
    }

    /// The agent's `ajax` helper, through the transmission filter
    pub async fn filtered_ajax(&self, params: AjaxRequest) -> AjaxResponse {
        filtered_ajax(&self.env, params).await
    }
}

/// Default factory: helpers bound to the given environment
#[must_use]
pub fn make_fixup_helpers(env: Arc<SandboxEnv>) -> FixupHelpers {
    FixupHelpers::new(env)
}
