//! Filter error types

/// A call or response the sandbox refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// Outbound call outside the allow-list
    #[error("transmission denied: {0}")]
    TransmissionDenied(String),

    /// Inbound response with a disallowed shape or key
    #[error("response rejected: {0}")]
    ResponseShape(String),

    /// Denied element creation, template use, recursion or code injection
    #[error("capability violation: {0}")]
    CapabilityViolation(String),
}

impl FilterError {
    /// Create and log a transmission denial
    pub fn denied(message: impl Into<String>) -> Self {
        Self::TransmissionDenied(message.into()).logged()
    }

    /// Create and log a response rejection
    pub fn response(message: impl Into<String>) -> Self {
        Self::ResponseShape(message.into()).logged()
    }

    /// Create and log a capability violation
    pub fn capability(message: impl Into<String>) -> Self {
        Self::CapabilityViolation(message.into()).logged()
    }

    fn logged(self) -> Self {
        tracing::error!("{}", self);
        self
    }
}

/// Result alias for filter checks
pub type FilterResult<T> = Result<T, FilterError>;
