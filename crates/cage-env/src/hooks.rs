//! Initialization hooks handed to the agent

use std::fmt;
use std::sync::Arc;

/// Lifecycle notification
pub type EventHook = Arc<dyn Fn() + Send + Sync>;

/// Url redaction applied before the agent records a url
pub type UrlSanitizer = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Signature check for guides, launchers or global scripts
pub type SignatureValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Lifecycle callbacks
#[derive(Clone, Default)]
pub struct LifecycleEvents {
    pub ready: Option<EventHook>,
    pub deliverables_loaded: Option<EventHook>,
    pub guides_failed: Option<EventHook>,
    pub guides_loaded: Option<EventHook>,
}

impl fmt::Debug for LifecycleEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvents")
            .field("ready", &self.ready.is_some())
            .field("deliverables_loaded", &self.deliverables_loaded.is_some())
            .field("guides_failed", &self.guides_failed.is_some())
            .field("guides_loaded", &self.guides_loaded.is_some())
            .finish()
    }
}

/// Named lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Ready,
    DeliverablesLoaded,
    GuidesFailed,
    GuidesLoaded,
}

/// Hooks passed along with `initialize`
///
/// Guides are accepted by default; launchers and global scripts are refused.
#[derive(Clone)]
pub struct InitializeHooks {
    pub sanitize_url: Option<UrlSanitizer>,
    pub events: LifecycleEvents,
    pub validate_guide: SignatureValidator,
    pub validate_launcher: SignatureValidator,
    pub validate_global_script: SignatureValidator,
}

impl Default for InitializeHooks {
    fn default() -> Self {
        Self {
            sanitize_url: None,
            events: LifecycleEvents::default(),
            validate_guide: Arc::new(|_| true),
            validate_launcher: Arc::new(|_| false),
            validate_global_script: Arc::new(|_| false),
        }
    }
}

impl fmt::Debug for InitializeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializeHooks")
            .field("sanitize_url", &self.sanitize_url.is_some())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl InitializeHooks {
    /// Set the url sanitizer
    #[must_use]
    pub fn with_sanitize_url(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.sanitize_url = Some(Arc::new(f));
        self
    }

    /// Set a lifecycle callback
    #[must_use]
    pub fn on(mut self, event: LifecycleEvent, f: impl Fn() + Send + Sync + 'static) -> Self {
        let hook: EventHook = Arc::new(f);
        match event {
            LifecycleEvent::Ready => self.events.ready = Some(hook),
            LifecycleEvent::DeliverablesLoaded => self.events.deliverables_loaded = Some(hook),
            LifecycleEvent::GuidesFailed => self.events.guides_failed = Some(hook),
            LifecycleEvent::GuidesLoaded => self.events.guides_loaded = Some(hook),
        }
        self
    }

    /// Redact a url, unchanged when no sanitizer is set
    #[must_use]
    pub fn sanitize(&self, url: &str) -> String {
        self.sanitize_url
            .as_ref()
            .map_or_else(|| url.to_string(), |f| f(url))
    }

    /// Fire a lifecycle callback, if set
    pub fn emit(&self, event: LifecycleEvent) {
        let hook = match event {
            LifecycleEvent::Ready => &self.events.ready,
            LifecycleEvent::DeliverablesLoaded => &self.events.deliverables_loaded,
            LifecycleEvent::GuidesFailed => &self.events.guides_failed,
            LifecycleEvent::GuidesLoaded => &self.events.guides_loaded,
        };
        tracing::debug!("agent lifecycle event {:?}", event);
        if let Some(hook) = hook {
            hook();
        }
    }
}
